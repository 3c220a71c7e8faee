//! Combinators over groups of futures.
//!
//! Both combinators are [`Schedulable`]s, so a coroutine can yield them as
//! child tasks or a host can [`start`](SchedulerHandle::start) them
//! directly. They only observe their inputs: disposing a combinator's
//! future leaves the inputs running.
//!
//! # Semantics
//!
//! `WaitForAll(fs)` completes once every input has completed, failed or
//! been disposed, and fails with the first failure it observes.
//!
//! `WaitForFirst(fs)` completes with the index of the first input to
//! complete or fail. Disposed inputs never win; if every input is disposed
//! the combinator's future is disposed too.

use crate::error::Error;
use crate::future::{AnyFuture, Future};
use crate::runtime::{Schedulable, SchedulerHandle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Waits for every input future.
#[derive(Debug, Clone)]
pub struct WaitForAll {
    futures: Vec<AnyFuture>,
}

impl WaitForAll {
    /// Creates the combinator over `futures`.
    pub fn new<I>(futures: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<AnyFuture>,
    {
        Self {
            futures: futures.into_iter().map(Into::into).collect(),
        }
    }
}

impl Schedulable for WaitForAll {
    type Output = ();

    fn schedule(self, _scheduler: &SchedulerHandle, future: &Future<()>) {
        if self.futures.is_empty() {
            let _ = future.complete(());
            return;
        }
        let remaining = Arc::new(AtomicUsize::new(self.futures.len()));
        for input in self.futures {
            let on_settled = {
                let remaining = Arc::clone(&remaining);
                let future = future.clone();
                let input = input.clone();
                move || {
                    if let Some(err) = input.error() {
                        let _ = future.fail(err);
                    }
                    finish_one(&remaining, &future);
                }
            };
            input.register_on_settled(on_settled);

            let remaining = Arc::clone(&remaining);
            let future = future.clone();
            input.register_on_dispose(move || finish_one(&remaining, &future));
        }
    }
}

fn finish_one(remaining: &AtomicUsize, future: &Future<()>) {
    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
        // A failure or a disposal of the combinator already settled it.
        let _ = future.complete(());
    }
}

/// Waits for the first input future to settle.
#[derive(Debug, Clone)]
pub struct WaitForFirst {
    futures: Vec<AnyFuture>,
}

impl WaitForFirst {
    /// Creates the combinator over `futures`.
    pub fn new<I>(futures: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<AnyFuture>,
    {
        Self {
            futures: futures.into_iter().map(Into::into).collect(),
        }
    }
}

impl Schedulable for WaitForFirst {
    type Output = usize;

    fn schedule(self, _scheduler: &SchedulerHandle, future: &Future<usize>) {
        if self.futures.is_empty() {
            let _ = future.fail(Error::msg("WaitForFirst needs at least one future"));
            return;
        }
        let alive = Arc::new(AtomicUsize::new(self.futures.len()));
        for (index, input) in self.futures.into_iter().enumerate() {
            let winner = future.clone();
            input.register_on_settled(move || {
                // Later inputs lose the race; their completions are rejected.
                let _ = winner.complete(index);
            });

            let alive = Arc::clone(&alive);
            let future = future.clone();
            input.register_on_dispose(move || {
                if alive.fetch_sub(1, Ordering::AcqRel) == 1 {
                    future.dispose();
                }
            });
        }
    }
}

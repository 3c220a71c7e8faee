//! Coroutines and the suspension intents they yield.
//!
//! A [`Coroutine`] is an explicit state object. Each call to
//! [`Coroutine::resume`] advances it by one unit and returns what the
//! coroutine wants to happen next:
//!
//! | `resume` returns | Meaning |
//! |------------------|---------|
//! | `Ok(Some(yielded))` | Suspend as described by the [`Yielded`] intent |
//! | `Ok(None)` | Exhausted without a result |
//! | `Err(error)` | Failed; the task's future fails with `error` |
//!
//! The driver never calls `resume` re-entrantly and never from two threads
//! at once, so coroutine state needs no locking.

use super::schedulables::{Sleep, WaitForHandle};
use super::CoroutineTask;
use crate::error::Error;
use crate::future::{AnyFuture, Future};
use crate::runtime::{Schedulable, SchedulerHandle, TaskExecutionPolicy};
use crate::sync::WaitHandle;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

/// A suspend/resume sequence driven by the scheduler.
pub trait Coroutine: Send + 'static {
    /// Type of the value a [`Yielded::Result`] carries.
    type Output: Clone + Send + 'static;

    /// Advances the sequence by one unit.
    ///
    /// # Errors
    ///
    /// An error fails the task's future and disposes the coroutine.
    fn resume(&mut self) -> Result<Option<Yielded<Self::Output>>, Error>;
}

/// A schedulable whose concrete type has been erased, so a coroutine can
/// yield any kind of child task.
pub trait DynSchedulable: Send + 'static {
    /// Starts the task under `policy` and returns its future.
    fn start_boxed(self: Box<Self>, scheduler: &SchedulerHandle, policy: TaskExecutionPolicy)
        -> AnyFuture;
}

impl<S: Schedulable> DynSchedulable for S {
    fn start_boxed(
        self: Box<Self>,
        scheduler: &SchedulerHandle,
        policy: TaskExecutionPolicy,
    ) -> AnyFuture {
        scheduler.start_with_policy(*self, policy).into()
    }
}

/// What a coroutine wants the driver to do after a step.
pub enum Yielded<T> {
    /// Start a child task and resume once its future settles.
    Start {
        /// The child.
        task: Box<dyn DynSchedulable>,
        /// Policy the child runs under.
        policy: TaskExecutionPolicy,
    },
    /// Requeue behind the work already queued.
    Yield,
    /// Resume on a later tick, after the step listeners of the next one.
    NextTick,
    /// Publish a value to the task's external-value handler.
    ///
    /// If the handler returns a future the coroutine waits for it;
    /// otherwise, or with no handler installed, it resumes right away.
    NextValue(Box<dyn Any + Send>),
    /// Resume once this future settles.
    Wait(AnyFuture),
    /// Complete the task's future with this value. No further steps run.
    Result(T),
    /// A no-op yield, equivalent to [`Yielded::Yield`].
    Nothing,
    /// A value that is not a suspension intent. Fails the task with
    /// [`ErrorKind::UnsupportedYield`](crate::ErrorKind::UnsupportedYield).
    Bare(Box<dyn Any + Send>),
}

impl<T> Yielded<T> {
    /// Starts `task` as a child and waits for it.
    pub fn start<S: Schedulable>(task: S) -> Self {
        Self::start_with_policy(task, TaskExecutionPolicy::RunWhileFutureLives)
    }

    /// Starts `task` as a child under `policy` and waits for it.
    pub fn start_with_policy<S: Schedulable>(task: S, policy: TaskExecutionPolicy) -> Self {
        Self::Start {
            task: Box::new(task),
            policy,
        }
    }

    /// Runs a nested coroutine to completion before resuming.
    ///
    /// The child runs as a background task: its failure is re-raised from
    /// [`SchedulerHandle::step`] while the parent simply resumes.
    pub fn run_to_completion<C: Coroutine>(coroutine: C) -> Self {
        Self::start_with_policy(
            CoroutineTask::new(coroutine),
            TaskExecutionPolicy::RunAsBackgroundTask,
        )
    }

    /// Resumes after `duration` has elapsed.
    pub fn sleep(duration: Duration) -> Self {
        Self::start(Sleep::new(duration))
    }

    /// Resumes once `handle` is signaled.
    pub fn wait_for(handle: &WaitHandle) -> Self {
        Self::start(WaitForHandle::new(handle.clone()))
    }

    /// Resumes once `future` settles.
    pub fn wait(future: impl Into<AnyFuture>) -> Self {
        Self::Wait(future.into())
    }

    /// Publishes `value` to the external-value handler.
    pub fn next_value<V: Any + Send>(value: V) -> Self {
        Self::NextValue(Box::new(value))
    }

    /// Yields a plain value. Always a protocol error.
    pub fn bare<V: Any + Send>(value: V) -> Self {
        Self::Bare(Box::new(value))
    }
}

impl<T, U: Clone + Send + 'static> From<Future<U>> for Yielded<T> {
    fn from(future: Future<U>) -> Self {
        Self::Wait(future.into())
    }
}

impl<T: fmt::Debug> fmt::Debug for Yielded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start { policy, .. } => f
                .debug_struct("Start")
                .field("policy", policy)
                .finish_non_exhaustive(),
            Self::Yield => f.write_str("Yield"),
            Self::NextTick => f.write_str("NextTick"),
            Self::NextValue(_) => f.write_str("NextValue(..)"),
            Self::Wait(future) => f.debug_tuple("Wait").field(future).finish(),
            Self::Result(value) => f.debug_tuple("Result").field(value).finish(),
            Self::Nothing => f.write_str("Nothing"),
            Self::Bare(_) => f.write_str("Bare(..)"),
        }
    }
}

/// Creates a coroutine from a closure called once per step.
pub fn from_fn<T, F>(step: F) -> FromFn<F, T>
where
    T: Clone + Send + 'static,
    F: FnMut() -> Result<Option<Yielded<T>>, Error> + Send + 'static,
{
    FromFn {
        step,
        _output: PhantomData,
    }
}

/// Coroutine returned by [`from_fn`].
pub struct FromFn<F, T> {
    step: F,
    _output: PhantomData<fn() -> T>,
}

impl<F, T> Coroutine for FromFn<F, T>
where
    T: Clone + Send + 'static,
    F: FnMut() -> Result<Option<Yielded<T>>, Error> + Send + 'static,
{
    type Output = T;

    fn resume(&mut self) -> Result<Option<Yielded<T>>, Error> {
        (self.step)()
    }
}

impl<F, T> fmt::Debug for FromFn<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FromFn").finish_non_exhaustive()
    }
}

/// Creates a coroutine that yields each item of `iter` in turn.
///
/// The iterator runs lazily, one item per step.
pub fn from_iter<I, T>(iter: I) -> FromIter<I::IntoIter>
where
    I: IntoIterator<Item = Yielded<T>>,
    I::IntoIter: Send + 'static,
    T: Clone + Send + 'static,
{
    FromIter {
        iter: iter.into_iter(),
    }
}

/// Coroutine returned by [`from_iter`].
#[derive(Debug)]
pub struct FromIter<I> {
    iter: I,
}

impl<I, T> Coroutine for FromIter<I>
where
    I: Iterator<Item = Yielded<T>> + Send + 'static,
    T: Clone + Send + 'static,
{
    type Output = T;

    fn resume(&mut self) -> Result<Option<Yielded<T>>, Error> {
        Ok(self.iter.next())
    }
}

/// Creates a coroutine from an iterator of fallible steps.
///
/// The first `Err` item fails the task.
pub fn try_from_iter<I, T>(iter: I) -> TryFromIter<I::IntoIter>
where
    I: IntoIterator<Item = Result<Yielded<T>, Error>>,
    I::IntoIter: Send + 'static,
    T: Clone + Send + 'static,
{
    TryFromIter {
        iter: iter.into_iter(),
    }
}

/// Coroutine returned by [`try_from_iter`].
#[derive(Debug)]
pub struct TryFromIter<I> {
    iter: I,
}

impl<I, T> Coroutine for TryFromIter<I>
where
    I: Iterator<Item = Result<Yielded<T>, Error>> + Send + 'static,
    T: Clone + Send + 'static,
{
    type Output = T;

    fn resume(&mut self) -> Result<Option<Yielded<T>>, Error> {
        self.iter.next().transpose()
    }
}

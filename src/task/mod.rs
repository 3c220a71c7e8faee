//! Coroutine tasks.
//!
//! This module turns a [`Coroutine`] into something the scheduler can run:
//!
//! - [`coroutine`]: the [`Coroutine`] trait, the [`Yielded`] intents and
//!   closure/iterator adapters
//! - `driver`: the state machine advancing a coroutine one step per job
//! - [`schedulables`]: built-in child tasks ([`Sleep`], [`WaitForHandle`])
//! - [`combinator`]: [`WaitForAll`] and [`WaitForFirst`]
//!
//! # Example
//!
//! ```ignore
//! use cotask::task::{from_fn, Yielded};
//! use std::time::Duration;
//!
//! let mut stage = 0;
//! let result = scheduler.start_coroutine(from_fn(move || {
//!     stage += 1;
//!     Ok(Some(match stage {
//!         1 => Yielded::sleep(Duration::from_millis(50)),
//!         _ => Yielded::Result("done"),
//!     }))
//! }));
//! ```

pub mod combinator;
pub mod coroutine;
mod driver;
pub mod schedulables;

pub use combinator::{WaitForAll, WaitForFirst};
pub use coroutine::{
    from_fn, from_iter, try_from_iter, Coroutine, DynSchedulable, FromFn, FromIter, TryFromIter,
    Yielded,
};
pub use schedulables::{Sleep, WaitForHandle};

use crate::error::Error;
use crate::future::{AnyFuture, Future};
use crate::runtime::{Schedulable, SchedulerHandle};
use driver::Driver;
use std::any::{type_name, Any};
use std::fmt;

pub(crate) type NextValueHandler =
    Box<dyn FnMut(Box<dyn Any + Send>) -> Result<Option<AnyFuture>, Error> + Send + 'static>;

/// A coroutine packaged for [`SchedulerHandle::start`].
///
/// The task's future completes with `Some(value)` when the coroutine yields
/// [`Yielded::Result`], with `None` when it is exhausted, and fails when
/// `resume` returns an error.
pub struct CoroutineTask<C: Coroutine> {
    coroutine: C,
    on_next_value: Option<NextValueHandler>,
}

impl<C: Coroutine> CoroutineTask<C> {
    /// Wraps `coroutine`.
    pub fn new(coroutine: C) -> Self {
        Self {
            coroutine,
            on_next_value: None,
        }
    }

    /// Installs the handler for values published with [`Yielded::NextValue`].
    ///
    /// Returning a future makes the coroutine wait for it before resuming.
    /// A published value that is not a `V` fails the task with
    /// [`ErrorKind::UnsupportedYield`](crate::ErrorKind::UnsupportedYield).
    #[must_use]
    pub fn on_next_value<V, F>(mut self, mut handler: F) -> Self
    where
        V: Any + Send,
        F: FnMut(V) -> Option<AnyFuture> + Send + 'static,
    {
        let erased: NextValueHandler = Box::new(move |payload: Box<dyn Any + Send>| {
            payload
                .downcast::<V>()
                .map(|value| handler(*value))
                .map_err(|_| {
                    Error::unsupported_yield(format!(
                        "published value is not a {}",
                        type_name::<V>()
                    ))
                })
        });
        self.on_next_value = Some(erased);
        self
    }
}

impl<C: Coroutine> Schedulable for CoroutineTask<C> {
    type Output = Option<C::Output>;

    fn schedule(self, scheduler: &SchedulerHandle, future: &Future<Self::Output>) {
        Driver::launch(self.coroutine, self.on_next_value, scheduler, future);
    }
}

impl<C: Coroutine> fmt::Debug for CoroutineTask<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoroutineTask")
            .field("coroutine", &type_name::<C>())
            .field("on_next_value", &self.on_next_value.is_some())
            .finish()
    }
}

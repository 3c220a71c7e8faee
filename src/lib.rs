//! Cotask: a cooperative task scheduler with single-assignment futures.
//!
//! # Overview
//!
//! Cotask runs cooperative tasks on a thread the host controls. Nothing
//! executes until the host calls [`SchedulerHandle::step`]; each step drains
//! the work that was queued before it began. Tasks that would block hand the
//! blocking part to background workers and resume on the stepping thread
//! once it is done.
//!
//! # Core Guarantees
//!
//! - **Single assignment**: a [`Future`] settles at most once; a second
//!   `complete` or `fail` is rejected and leaves the first outcome intact
//! - **Stepping-thread execution**: coroutine bodies only ever run inside
//!   `step`, never on a worker thread
//! - **Bounded ticks**: work queued while a tick runs is deferred to the next
//!   tick, so `step` always terminates
//! - **Disposal propagates down**: disposing a task's future disposes
//!   whatever the task was suspended on
//!
//! # Module Structure
//!
//! - [`future`]: [`Future<T>`] and its type-erased view [`AnyFuture`]
//! - [`runtime`]: the scheduler, its configuration, job queue, and thread pools
//! - [`task`]: the [`Coroutine`](task::Coroutine) protocol, built-in child
//!   tasks, and combinators
//! - [`sync`]: [`WaitHandle`] and the workers' wake event
//! - [`error`]: Error types
//! - [`tracing_compat`]: logging macros that compile away without the
//!   `tracing-integration` feature

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod error;
pub mod future;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod tracing_compat;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use error::{Error, ErrorCategory, ErrorKind, Result};
pub use future::{AnyFuture, Future, FutureStatus};
pub use runtime::{
    BlockingPool, BlockingPoolConfig, ConfigError, InlinePool, Schedulable, SchedulerBuilder,
    SchedulerConfig, SchedulerHandle, TaskExecutionPolicy, TaskScheduler, ThreadPool,
    ThreadSafety,
};
pub use sync::{ResetMode, WaitHandle};
pub use task::{
    from_fn, from_iter, try_from_iter, Coroutine, CoroutineTask, Sleep, WaitForAll, WaitForFirst,
    WaitForHandle, Yielded,
};

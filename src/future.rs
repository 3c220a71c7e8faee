//! Single-assignment futures.
//!
//! A [`Future<T>`] is a shared slot that settles exactly once: it either
//! completes with a value, fails with an [`Error`], or is disposed while still
//! pending. Every transition is guarded by a lock, so any thread may complete,
//! fail, or dispose a future, and any thread may register callbacks.
//!
//! ```text
//!              complete(v)
//!   Pending ───────────────► Completed(v)
//!      │  \     fail(e)
//!      │   ───────────────► Failed(e)
//!      │        dispose()
//!      └──────────────────► Disposed
//! ```
//!
//! # Callbacks
//!
//! Completion callbacks fire for both `complete` and `fail`. Disposal
//! callbacks fire only when a pending future is disposed. Callbacks run on
//! the thread that performed the transition, after the internal lock has been
//! released, in registration order. Registering a callback on a future that
//! already reached the matching terminal state invokes it immediately on the
//! registering thread.
//!
//! Continuations registered by the scheduler never do real work inside these
//! callbacks: they only enqueue a job, so cooperative code keeps running on
//! the stepping thread.

use crate::error::{Error, ErrorKind};
use crate::tracing_compat::trace;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_FUTURE_ID: AtomicU64 = AtomicU64::new(1);

type CompleteCallback<T> = Box<dyn FnOnce(Result<T, Error>) + Send + 'static>;
type DisposeCallback = Box<dyn FnOnce() + Send + 'static>;

/// Observable state of a future.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FutureStatus {
    /// Not yet settled.
    Pending,
    /// Completed with a value.
    Completed,
    /// Failed with an error.
    Failed,
    /// Disposed before it settled.
    Disposed,
}

impl FutureStatus {
    /// Returns true once the future reached any terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

enum State<T> {
    Pending,
    Completed(T),
    Failed(Error),
    Disposed,
}

struct Slot<T> {
    state: State<T>,
    on_complete: Vec<CompleteCallback<T>>,
    on_dispose: Vec<DisposeCallback>,
}

struct FutureInner<T> {
    id: u64,
    slot: Mutex<Slot<T>>,
}

/// A single-assignment container for an eventual value or error.
///
/// Cloning a `Future` clones the handle, not the slot: all clones observe
/// the same state.
pub struct Future<T> {
    inner: Arc<FutureInner<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Future<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    /// Creates a pending future.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FutureInner {
                id: NEXT_FUTURE_ID.fetch_add(1, Ordering::Relaxed),
                slot: Mutex::new(Slot {
                    state: State::Pending,
                    on_complete: Vec::new(),
                    on_dispose: Vec::new(),
                }),
            }),
        }
    }

    /// Creates a future that is already completed with `value`.
    #[must_use]
    pub fn completed(value: T) -> Self {
        let future = Self::new();
        future.inner.slot.lock().state = State::Completed(value);
        future
    }

    /// Creates a future that has already failed with `error`.
    #[must_use]
    pub fn failed(error: Error) -> Self {
        let future = Self::new();
        future.inner.slot.lock().state = State::Failed(error);
        future
    }

    /// Process-unique identifier, for logging.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn status(&self) -> FutureStatus {
        match self.inner.slot.lock().state {
            State::Pending => FutureStatus::Pending,
            State::Completed(_) => FutureStatus::Completed,
            State::Failed(_) => FutureStatus::Failed,
            State::Disposed => FutureStatus::Disposed,
        }
    }

    /// Returns true while the future has not reached a terminal state.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status() == FutureStatus::Pending
    }

    /// Returns true if the future completed or failed.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(
            self.status(),
            FutureStatus::Completed | FutureStatus::Failed
        )
    }

    /// Returns true if the future failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status() == FutureStatus::Failed
    }

    /// Returns true if the future was disposed while pending.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.status() == FutureStatus::Disposed
    }

    /// Returns the outcome once the future has completed or failed.
    #[must_use]
    pub fn result(&self) -> Option<Result<T, Error>> {
        match &self.inner.slot.lock().state {
            State::Completed(value) => Some(Ok(value.clone())),
            State::Failed(error) => Some(Err(error.clone())),
            State::Pending | State::Disposed => None,
        }
    }

    /// Returns the value if the future completed successfully.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.result().and_then(Result::ok)
    }

    /// Returns the error if the future failed.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        self.result().and_then(Result::err)
    }

    /// Completes the future with `value`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AlreadySettled`] if the future already completed
    /// or failed, and [`ErrorKind::FutureDisposed`] if it was disposed. In both
    /// cases nothing is delivered to callbacks.
    pub fn complete(&self, value: T) -> Result<(), Error> {
        self.settle(Ok(value))
    }

    /// Fails the future with `error`.
    ///
    /// # Errors
    ///
    /// Same as [`Future::complete`].
    pub fn fail(&self, error: Error) -> Result<(), Error> {
        self.settle(Err(error))
    }

    fn settle(&self, outcome: Result<T, Error>) -> Result<(), Error> {
        let (callbacks, dropped) = {
            let mut slot = self.inner.slot.lock();
            match slot.state {
                State::Pending => {}
                State::Disposed => {
                    return Err(Error::new(ErrorKind::FutureDisposed)
                        .with_message(format!("future {} was disposed", self.inner.id)));
                }
                State::Completed(_) | State::Failed(_) => {
                    return Err(Error::new(ErrorKind::AlreadySettled)
                        .with_message(format!("future {} already settled", self.inner.id)));
                }
            }
            slot.state = match &outcome {
                Ok(value) => State::Completed(value.clone()),
                Err(error) => State::Failed(error.clone()),
            };
            (
                std::mem::take(&mut slot.on_complete),
                std::mem::take(&mut slot.on_dispose),
            )
        };
        // Disposal callbacks can never fire now.
        drop(dropped);

        trace!(
            future_id = self.inner.id,
            ok = outcome.is_ok(),
            callbacks = callbacks.len(),
            "future settled"
        );
        for callback in callbacks {
            callback(outcome.clone());
        }
        Ok(())
    }

    /// Disposes the future.
    ///
    /// A pending future becomes [`FutureStatus::Disposed`] and its disposal
    /// callbacks run. Disposing a future that already reached a terminal state
    /// does nothing, so repeated calls are harmless.
    pub fn dispose(&self) {
        let (callbacks, dropped) = {
            let mut slot = self.inner.slot.lock();
            if !matches!(slot.state, State::Pending) {
                return;
            }
            slot.state = State::Disposed;
            (
                std::mem::take(&mut slot.on_dispose),
                std::mem::take(&mut slot.on_complete),
            )
        };
        drop(dropped);

        trace!(
            future_id = self.inner.id,
            callbacks = callbacks.len(),
            "future disposed"
        );
        for callback in callbacks {
            callback();
        }
    }

    /// Registers a callback to run when the future completes or fails.
    ///
    /// If the future already settled, the callback runs immediately on the
    /// calling thread. If it was disposed, the callback is dropped unrun.
    pub fn register_on_complete<F>(&self, callback: F)
    where
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        let outcome = {
            let mut slot = self.inner.slot.lock();
            match &slot.state {
                State::Pending => {
                    slot.on_complete.push(Box::new(callback));
                    return;
                }
                State::Completed(value) => Ok(value.clone()),
                State::Failed(error) => Err(error.clone()),
                State::Disposed => return,
            }
        };
        callback(outcome);
    }

    /// Registers a callback to run when the future is disposed while pending.
    ///
    /// If the future is already disposed, the callback runs immediately. If it
    /// already completed or failed, the callback is dropped unrun.
    pub fn register_on_dispose<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut slot = self.inner.slot.lock();
            match slot.state {
                State::Pending => {
                    slot.on_dispose.push(Box::new(callback));
                    return;
                }
                State::Disposed => {}
                State::Completed(_) | State::Failed(_) => return,
            }
        }
        callback();
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

/// Type-erased view of a future, used where only settlement matters.
trait ErasedFuture: Send + Sync {
    fn id(&self) -> u64;
    fn status(&self) -> FutureStatus;
    fn error(&self) -> Option<Error>;
    fn on_settled(&self, callback: DisposeCallback);
    fn on_disposed(&self, callback: DisposeCallback);
    fn dispose(&self);
}

impl<T: Clone + Send + 'static> ErasedFuture for Future<T> {
    fn id(&self) -> u64 {
        Self::id(self)
    }

    fn status(&self) -> FutureStatus {
        Self::status(self)
    }

    fn error(&self) -> Option<Error> {
        Self::error(self)
    }

    fn on_settled(&self, callback: DisposeCallback) {
        self.register_on_complete(move |_| callback());
    }

    fn on_disposed(&self, callback: DisposeCallback) {
        self.register_on_dispose(callback);
    }

    fn dispose(&self) {
        Self::dispose(self);
    }
}

/// A future of any value type.
///
/// This is what a suspended coroutine waits on: the driver only needs to
/// know when the future settles or is disposed, never its value.
#[derive(Clone)]
pub struct AnyFuture {
    inner: Arc<dyn ErasedFuture>,
}

impl AnyFuture {
    /// Identifier of the underlying future.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id()
    }

    /// Current state of the underlying future.
    #[must_use]
    pub fn status(&self) -> FutureStatus {
        self.inner.status()
    }

    /// Returns true if the underlying future completed or failed.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(
            self.status(),
            FutureStatus::Completed | FutureStatus::Failed
        )
    }

    /// Returns true if the underlying future was disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.status() == FutureStatus::Disposed
    }

    /// Returns the failure of the underlying future, if it failed.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        self.inner.error()
    }

    /// Runs `callback` once the underlying future completes or fails.
    pub fn register_on_settled<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.on_settled(Box::new(callback));
    }

    /// Runs `callback` if the underlying future is disposed while pending.
    pub fn register_on_dispose<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.on_disposed(Box::new(callback));
    }

    /// Disposes the underlying future.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl<T: Clone + Send + 'static> From<Future<T>> for AnyFuture {
    fn from(future: Future<T>) -> Self {
        Self {
            inner: Arc::new(future),
        }
    }
}

impl<T: Clone + Send + 'static> From<&Future<T>> for AnyFuture {
    fn from(future: &Future<T>) -> Self {
        Self::from(future.clone())
    }
}

impl fmt::Debug for AnyFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyFuture")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::AtomicUsize;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn complete_delivers_value_to_callbacks_in_order() {
        init_test("complete_delivers_value_to_callbacks_in_order");
        let future = Future::<i32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let seen = Arc::clone(&seen);
            future.register_on_complete(move |outcome| {
                seen.lock().push((tag, outcome.expect("completed")));
            });
        }
        future.complete(7).expect("first completion");

        assert_eq!(*seen.lock(), vec![(0, 7), (1, 7), (2, 7)]);
        assert_eq!(future.status(), FutureStatus::Completed);
        assert_eq!(future.value(), Some(7));
        crate::test_complete!("complete_delivers_value_to_callbacks_in_order");
    }

    #[test]
    fn second_transition_is_rejected() {
        init_test("second_transition_is_rejected");
        let future = Future::<i32>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        future.register_on_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        future.complete(1).expect("first completion");
        let err = future.complete(2).expect_err("double completion");
        assert_eq!(err.kind(), ErrorKind::AlreadySettled);
        let err = future.fail(Error::msg("late")).expect_err("fail after complete");
        assert_eq!(err.kind(), ErrorKind::AlreadySettled);
        future.dispose();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(future.value(), Some(1));
    }

    #[test]
    fn register_after_settle_fires_synchronously() {
        init_test("register_after_settle_fires_synchronously");
        let future = Future::<&'static str>::new();
        future.fail(Error::msg("broken")).expect("fail");

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        future.register_on_complete(move |outcome| {
            assert_eq!(outcome.expect_err("failed").message(), Some("broken"));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // A dispose callback on a settled future never runs.
        let counter = Arc::clone(&fired);
        future.register_on_dispose(move || {
            counter.fetch_add(100, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispose_is_idempotent_and_blocks_completion() {
        init_test("dispose_is_idempotent_and_blocks_completion");
        let future = Future::<u8>::new();
        let disposed = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&disposed);
        future.register_on_dispose(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&completed);
        future.register_on_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        future.dispose();
        future.dispose();
        let err = future.complete(3).expect_err("completion after dispose");
        assert_eq!(err.kind(), ErrorKind::FutureDisposed);

        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert_eq!(completed.load(Ordering::SeqCst), 0);
        assert!(future.is_disposed());
        assert_eq!(future.result().map(|r| r.is_ok()), None);

        let counter = Arc::clone(&disposed);
        future.register_on_dispose(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(disposed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn callback_may_reenter_the_same_future() {
        init_test("callback_may_reenter_the_same_future");
        let future = Future::<i32>::new();
        let observer = future.clone();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        future.register_on_complete(move |_| {
            *sink.lock() = Some(observer.status());
        });
        future.complete(5).expect("complete");
        assert_eq!(*seen.lock(), Some(FutureStatus::Completed));
    }

    #[test]
    fn completion_from_another_thread() {
        init_test("completion_from_another_thread");
        let future = Future::<String>::new();
        let remote = future.clone();
        std::thread::spawn(move || remote.complete("done".to_string()))
            .join()
            .expect("thread")
            .expect("complete");
        assert_eq!(future.value().as_deref(), Some("done"));
    }

    #[test]
    fn any_future_tracks_settlement_and_disposal() {
        init_test("any_future_tracks_settlement_and_disposal");
        let typed = Future::<Vec<u8>>::new();
        let erased = AnyFuture::from(&typed);
        assert_eq!(erased.id(), typed.id());

        let settled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&settled);
        erased.register_on_settled(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        typed.fail(Error::msg("nope")).expect("fail");
        assert_eq!(settled.load(Ordering::SeqCst), 1);
        assert!(erased.is_settled());
        let message = erased
            .error()
            .and_then(|e| e.message().map(str::to_owned));
        assert_eq!(message.as_deref(), Some("nope"));

        let other = Future::<()>::new();
        let erased = AnyFuture::from(other.clone());
        erased.dispose();
        assert!(other.is_disposed());
    }

    #[test]
    fn prebuilt_futures() {
        init_test("prebuilt_futures");
        assert_eq!(Future::completed(9_u32).value(), Some(9));
        assert!(Future::<u32>::failed(Error::msg("x")).is_failed());
        assert!(FutureStatus::Disposed.is_terminal());
        assert!(!FutureStatus::Pending.is_terminal());
    }
}

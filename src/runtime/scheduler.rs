//! The cooperative task scheduler.
//!
//! A [`TaskScheduler`] owns the job queue, the step-listener queue, the sleep
//! and wait workers, and a [`ThreadPool`] for offloaded work. Nothing runs
//! cooperatively until the host calls [`SchedulerHandle::step`]:
//!
//! 1. The job queue depth is snapshotted.
//! 2. Every step listener registered before this tick runs, in order.
//! 3. The snapshotted number of work items runs, in order.
//!
//! Work queued by a listener or by a work item lands behind the snapshot and
//! runs on a later tick. Background threads never run continuations: they
//! only complete futures, and the continuations registered by the scheduler
//! only enqueue work.

use super::blocking_pool::{Job, ThreadPool};
use super::config::SchedulerConfig;
use super::job_queue::{JobQueue, WorkItem};
use super::timer::SleepWorker;
use super::wait::WaitWorker;
use crate::error::Error;
use crate::future::Future;
use crate::sync::WaitHandle;
use crate::task::{Coroutine, CoroutineTask};
use crate::tracing_compat::{debug, debug_span, error, trace};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

type StepListener = Box<dyn FnOnce() + Send + 'static>;

/// What happens to failures of a started task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskExecutionPolicy {
    /// Failures are left to whoever holds the returned future, and disposing
    /// that future cancels the task.
    #[default]
    RunWhileFutureLives,
    /// Failures are re-raised from a later [`SchedulerHandle::step`] so an
    /// orphaned task cannot fail silently.
    RunAsBackgroundTask,
}

/// A unit of work that knows how to start itself.
///
/// `schedule` is called once, by [`SchedulerHandle::start`], with the
/// future the unit must eventually settle. Implementations register
/// whatever they need with the scheduler and return without blocking.
pub trait Schedulable: Send + 'static {
    /// Value the unit completes its future with.
    type Output: Clone + Send + 'static;

    /// Begins executing against `scheduler`, settling `future` when done.
    fn schedule(self, scheduler: &SchedulerHandle, future: &Future<Self::Output>);
}

pub(crate) struct SchedulerInner {
    config: SchedulerConfig,
    jobs: JobQueue,
    step_listeners: Mutex<VecDeque<StepListener>>,
    sleep_worker: SleepWorker,
    wait_worker: WaitWorker,
    pool: Arc<dyn ThreadPool>,
    disposed: AtomicBool,
    tick: AtomicU64,
}

/// A cloneable handle to a scheduler.
///
/// Every operation is available through the handle. Cloning it does not
/// extend the life of the background workers: they stop when the owning
/// [`TaskScheduler`] is dropped or [`SchedulerHandle::dispose`] is called.
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Arc<SchedulerInner>,
}

impl SchedulerHandle {
    pub(crate) fn new(config: SchedulerConfig, pool: Arc<dyn ThreadPool>) -> Self {
        let timing = config.sleep_timing();
        let prefix = config.thread_name_prefix.clone();
        Self {
            inner: Arc::new(SchedulerInner {
                jobs: JobQueue::new(config.thread_safety),
                step_listeners: Mutex::new(VecDeque::new()),
                sleep_worker: SleepWorker::new(format!("{prefix}-sleep"), timing),
                wait_worker: WaitWorker::new(format!("{prefix}-wait")),
                pool,
                disposed: AtomicBool::new(false),
                tick: AtomicU64::new(0),
                config,
            }),
        }
    }

    /// Returns the configuration the scheduler was built with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    // === Starting work ===

    /// Starts `task` under [`TaskExecutionPolicy::RunWhileFutureLives`].
    pub fn start<S: Schedulable>(&self, task: S) -> Future<S::Output> {
        self.start_with_policy(task, TaskExecutionPolicy::default())
    }

    /// Starts `task` and returns the future it will settle.
    ///
    /// On a disposed scheduler the returned future has already failed with
    /// [`ErrorKind::SchedulerDisposed`](crate::ErrorKind::SchedulerDisposed).
    pub fn start_with_policy<S: Schedulable>(
        &self,
        task: S,
        policy: TaskExecutionPolicy,
    ) -> Future<S::Output> {
        if self.is_disposed() {
            return Future::failed(Error::scheduler_disposed());
        }
        let future = Future::new();
        debug!(future_id = future.id(), ?policy, "starting task");
        task.schedule(self, &future);
        if policy == TaskExecutionPolicy::RunAsBackgroundTask {
            self.reraise_failures(&future);
        }
        future
    }

    /// Starts a coroutine under [`TaskExecutionPolicy::RunWhileFutureLives`].
    ///
    /// The future completes with `Some(value)` when the coroutine yields a
    /// result and with `None` when it runs out without one.
    pub fn start_coroutine<C: Coroutine>(&self, coroutine: C) -> Future<Option<C::Output>> {
        self.start(CoroutineTask::new(coroutine))
    }

    /// Starts a coroutine under `policy`.
    pub fn start_coroutine_with_policy<C: Coroutine>(
        &self,
        coroutine: C,
        policy: TaskExecutionPolicy,
    ) -> Future<Option<C::Output>> {
        self.start_with_policy(CoroutineTask::new(coroutine), policy)
    }

    fn reraise_failures<T: Clone + Send + 'static>(&self, future: &Future<T>) {
        let weak = Arc::downgrade(&self.inner);
        let future_id = future.id();
        future.register_on_complete(move |outcome| {
            let Err(cause) = outcome else {
                return;
            };
            debug!(future_id, error = %cause, "background task failed");
            let Some(inner) = weak.upgrade() else {
                error!(future_id, error = %cause, "background task failed after scheduler was dropped");
                return;
            };
            let handle = Self { inner };
            let queued =
                handle.queue_work_item(move || Err(Error::background_task_failed(cause)));
            if let Err(err) = queued {
                error!(future_id, error = %err, "could not re-raise background task failure");
            }
        });
    }

    /// Runs `work` on the thread pool and returns a future over its result.
    ///
    /// A panic inside `work` fails the future with
    /// [`ErrorKind::Panicked`](crate::ErrorKind::Panicked). If the future is
    /// disposed before a pool thread picks the job up, `work` never runs.
    pub fn run_in_thread<T, F>(&self, work: F) -> Future<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Result<T, Error> + Send + 'static,
    {
        if self.is_disposed() {
            return Future::failed(Error::scheduler_disposed());
        }
        let future = Future::new();
        let target = future.clone();
        let job: Job = Box::new(move || {
            if target.is_disposed() {
                trace!(future_id = target.id(), "skipping offloaded work for disposed future");
                return;
            }
            let outcome = match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(outcome) => outcome,
                Err(payload) => Err(Error::panicked(panic_message(payload.as_ref()))),
            };
            let settled = match outcome {
                Ok(value) => target.complete(value),
                Err(err) => target.fail(err),
            };
            if let Err(err) = settled {
                trace!(future_id = target.id(), error = %err, "offloaded result discarded");
            }
        });
        self.inner.pool.execute(job);
        future
    }

    // === Registration ===

    /// Queues `item` to run during a later [`SchedulerHandle::step`].
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::SchedulerDisposed`](crate::ErrorKind::SchedulerDisposed)
    /// after disposal.
    pub fn queue_work_item<F>(&self, item: F) -> Result<(), Error>
    where
        F: FnOnce() -> Result<(), Error> + Send + 'static,
    {
        self.ensure_live()?;
        let item: WorkItem = Box::new(item);
        self.inner.jobs.queue_work_item(item);
        Ok(())
    }

    /// Registers a one-shot callback that runs at the start of the next tick,
    /// before that tick's work items.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::SchedulerDisposed`](crate::ErrorKind::SchedulerDisposed)
    /// after disposal.
    pub fn add_step_listener<F>(&self, listener: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_live()?;
        self.inner.step_listeners.lock().push_back(Box::new(listener));
        Ok(())
    }

    /// Completes `future` once `deadline` has passed.
    ///
    /// Disposing `future` first removes the registration.
    ///
    /// # Errors
    ///
    /// Fails after disposal or if the sleep worker thread cannot be spawned.
    pub fn queue_sleep(&self, deadline: Instant, future: &Future<()>) -> Result<(), Error> {
        self.ensure_live()?;
        let id = self.inner.sleep_worker.queue(deadline, future)?;
        trace!(future_id = future.id(), sleep_id = id, "queued sleep");
        let weak = Arc::downgrade(&self.inner);
        future.register_on_dispose(move || {
            if let Some(inner) = weak.upgrade() {
                inner.sleep_worker.cancel(id);
            }
        });
        Ok(())
    }

    /// Completes `future` once `handle` is signaled.
    ///
    /// Disposing `future` first removes the registration, so a later signal
    /// never reaches it.
    ///
    /// # Errors
    ///
    /// Fails after disposal or if the wait worker thread cannot be spawned.
    pub fn queue_wait(&self, handle: &WaitHandle, future: &Future<()>) -> Result<(), Error> {
        self.ensure_live()?;
        let id = self.inner.wait_worker.queue(handle, future)?;
        trace!(future_id = future.id(), wait_id = id, "queued wait");
        let weak = Arc::downgrade(&self.inner);
        future.register_on_dispose(move || {
            if let Some(inner) = weak.upgrade() {
                inner.wait_worker.cancel(id);
            }
        });
        Ok(())
    }

    // === Stepping ===

    /// Runs one tick. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a work item in this tick, such as a
    /// re-raised background task failure, or
    /// [`ErrorKind::SchedulerDisposed`](crate::ErrorKind::SchedulerDisposed)
    /// after disposal. Later errors from the same tick are logged.
    pub fn step(&self) -> Result<(), Error> {
        self.ensure_live()?;
        let tick = self.inner.tick.fetch_add(1, Ordering::Relaxed) + 1;
        let _span = debug_span!("tick", tick).entered();
        let budget = self.inner.jobs.len();
        let listeners = std::mem::take(&mut *self.inner.step_listeners.lock());
        trace!(tick, listeners = listeners.len(), batch = budget, "tick");
        for listener in listeners {
            listener();
        }
        self.inner.jobs.run_batch(budget).map(|_| ())
    }

    /// Returns true if a step listener or work item is waiting for a tick.
    #[must_use]
    pub fn has_pending_tasks(&self) -> bool {
        !self.inner.jobs.is_empty() || !self.inner.step_listeners.lock().is_empty()
    }

    /// Blocks until work is queued or `timeout` elapses.
    ///
    /// Returns whether anything is pending. Under
    /// [`ThreadSafety::SingleProducer`](super::ThreadSafety::SingleProducer)
    /// this never blocks.
    pub fn wait_for_work_items(&self, timeout: Duration) -> bool {
        if self.has_pending_tasks() {
            return true;
        }
        self.inner.jobs.wait_for_work_items(timeout)
    }

    // === Introspection ===

    /// Number of ticks run so far.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.inner.tick.load(Ordering::Relaxed)
    }

    /// Number of sleeps that have not fired yet.
    #[must_use]
    pub fn pending_sleeps(&self) -> usize {
        self.inner.sleep_worker.len()
    }

    /// Number of wait registrations whose handles have not signaled yet.
    #[must_use]
    pub fn pending_waits(&self) -> usize {
        self.inner.wait_worker.len()
    }

    /// Returns true after [`SchedulerHandle::dispose`].
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Stops both workers and clears every queue. Idempotent.
    ///
    /// Sleep and wait futures that never fired are disposed, which cancels
    /// any coroutine suspended on them.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(tick = self.tick_count(), "disposing scheduler");
        let sleeps = self.inner.sleep_worker.dispose();
        let waits = self.inner.wait_worker.dispose();
        self.inner.jobs.clear();
        let listeners = std::mem::take(&mut *self.inner.step_listeners.lock());
        drop(listeners);
        for future in sleeps.iter().chain(waits.iter()) {
            future.dispose();
        }
    }

    fn ensure_live(&self) -> Result<(), Error> {
        if self.is_disposed() {
            Err(Error::scheduler_disposed())
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("tick", &self.tick_count())
            .field("queued", &self.inner.jobs.len())
            .field("listeners", &self.inner.step_listeners.lock().len())
            .field("pending_sleeps", &self.pending_sleeps())
            .field("pending_waits", &self.pending_waits())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "work panicked".to_string()
    }
}

/// An owned scheduler. Disposes itself when dropped.
///
/// Dereferences to [`SchedulerHandle`] for every operation.
pub struct TaskScheduler {
    handle: SchedulerHandle,
}

impl TaskScheduler {
    /// Creates a scheduler with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        super::builder::SchedulerBuilder::new().build()
    }

    pub(crate) fn from_handle(handle: SchedulerHandle) -> Self {
        Self { handle }
    }

    /// Returns a cloneable handle.
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for TaskScheduler {
    type Target = SchedulerHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.handle.dispose();
    }
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskScheduler").field(&self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::{InlinePool, SchedulerBuilder, ThreadSafety};
    use crate::test_utils::{drive_until, init_test_logging};
    use std::sync::atomic::AtomicUsize;

    fn inline_scheduler() -> TaskScheduler {
        SchedulerBuilder::new()
            .thread_pool(Arc::new(InlinePool))
            .build()
    }

    struct Immediate(u32);

    impl Schedulable for Immediate {
        type Output = u32;

        fn schedule(self, _scheduler: &SchedulerHandle, future: &Future<u32>) {
            let _ = future.complete(self.0);
        }
    }

    struct Failing;

    impl Schedulable for Failing {
        type Output = ();

        fn schedule(self, scheduler: &SchedulerHandle, future: &Future<()>) {
            let future = future.clone();
            let _ = scheduler.queue_work_item(move || {
                let _ = future.fail(Error::msg("background boom"));
                Ok(())
            });
        }
    }

    #[test]
    fn start_returns_future_settled_by_schedulable() {
        init_test_logging();
        crate::test_phase!("start_returns_future_settled_by_schedulable");
        let scheduler = inline_scheduler();
        let future = scheduler.start(Immediate(7));
        assert_eq!(future.value(), Some(7));
        crate::test_complete!("start_returns_future_settled_by_schedulable");
    }

    #[test]
    fn listeners_run_before_work_items() {
        init_test_logging();
        crate::test_phase!("listeners_run_before_work_items");
        let scheduler = inline_scheduler();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = Arc::clone(&log);
        scheduler
            .queue_work_item(move || {
                l.lock().push("item");
                Ok(())
            })
            .expect("queue");
        let l = Arc::clone(&log);
        scheduler
            .add_step_listener(move || l.lock().push("listener"))
            .expect("listener");

        assert!(scheduler.has_pending_tasks());
        scheduler.step().expect("step");
        assert_eq!(*log.lock(), vec!["listener", "item"]);
        assert!(!scheduler.has_pending_tasks());
        assert_eq!(scheduler.tick_count(), 1);
    }

    #[test]
    fn listener_enqueues_are_deferred_to_next_tick() {
        init_test_logging();
        crate::test_phase!("listener_enqueues_are_deferred_to_next_tick");
        let scheduler = inline_scheduler();
        let ran = Arc::new(AtomicUsize::new(0));

        let handle = scheduler.handle();
        let r = Arc::clone(&ran);
        scheduler
            .add_step_listener(move || {
                let r = Arc::clone(&r);
                let _ = handle.queue_work_item(move || {
                    r.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
            })
            .expect("listener");

        scheduler.step().expect("tick 1");
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        scheduler.step().expect("tick 2");
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn background_failure_is_reraised_from_step() {
        init_test_logging();
        crate::test_phase!("background_failure_is_reraised_from_step");
        let scheduler = inline_scheduler();
        let future =
            scheduler.start_with_policy(Failing, TaskExecutionPolicy::RunAsBackgroundTask);

        scheduler.step().expect("failure happens in this tick");
        assert!(future.is_failed());
        let err = scheduler.step().expect_err("re-raised");
        assert_eq!(err.kind(), ErrorKind::BackgroundTaskFailed);
        assert_eq!(
            err.background_cause().and_then(Error::message),
            Some("background boom")
        );
        scheduler.step().expect("raised once");
    }

    #[test]
    fn foreground_failure_stays_on_future() {
        init_test_logging();
        let scheduler = inline_scheduler();
        let future = scheduler.start(Failing);
        scheduler.step().expect("tick");
        scheduler.step().expect("nothing re-raised");
        assert!(future.is_failed());
    }

    #[test]
    fn run_in_thread_completes_fails_and_catches_panics() {
        init_test_logging();
        crate::test_phase!("run_in_thread_completes_fails_and_catches_panics");
        let scheduler = inline_scheduler();

        let ok = scheduler.run_in_thread(|| Ok(21 * 2));
        assert_eq!(ok.value(), Some(42));

        let failed = scheduler.run_in_thread::<u32, _>(|| Err(Error::msg("io down")));
        assert_eq!(
            failed.error().and_then(|e| e.message().map(str::to_string)),
            Some("io down".to_string())
        );

        let panicked = scheduler.run_in_thread::<u32, _>(|| panic!("kaboom"));
        let err = panicked.error().expect("failed");
        assert_eq!(err.kind(), ErrorKind::Panicked);
        assert_eq!(err.message(), Some("kaboom"));
    }

    #[test]
    fn run_in_thread_on_blocking_pool() {
        init_test_logging();
        let scheduler = SchedulerBuilder::new().blocking_threads(0, 2).build();
        let future = scheduler.run_in_thread(|| {
            Ok(std::thread::current()
                .name()
                .unwrap_or_default()
                .to_string())
        });
        assert!(drive_until(&scheduler, Duration::from_secs(5), || !future
            .is_pending()));
        let name = future.value().expect("completed");
        assert!(name.starts_with("cotask-blocking-"), "{name}");
    }

    #[test]
    fn queue_sleep_completes_and_dispose_cancels() {
        init_test_logging();
        crate::test_phase!("queue_sleep_completes_and_dispose_cancels");
        let scheduler = inline_scheduler();
        let fires = Future::new();
        let cancelled = Future::new();
        let now = Instant::now();
        scheduler
            .queue_sleep(now + Duration::from_millis(10), &fires)
            .expect("sleep");
        scheduler
            .queue_sleep(now + Duration::from_secs(60), &cancelled)
            .expect("sleep");
        assert_eq!(scheduler.pending_sleeps(), 2);

        cancelled.dispose();
        assert_eq!(scheduler.pending_sleeps(), 1);
        assert!(drive_until(&scheduler, Duration::from_secs(5), || fires
            .is_settled()));
        assert_eq!(scheduler.pending_sleeps(), 0);
    }

    #[test]
    fn queue_wait_disposal_removes_registration() {
        init_test_logging();
        let scheduler = inline_scheduler();
        let handle = WaitHandle::manual();
        let stale = Future::new();
        scheduler.queue_wait(&handle, &stale).expect("wait");
        assert_eq!(scheduler.pending_waits(), 1);
        stale.dispose();
        assert_eq!(scheduler.pending_waits(), 0);
        handle.set();
        std::thread::sleep(Duration::from_millis(20));
        assert!(stale.is_disposed());
    }

    #[test]
    fn dispose_is_idempotent_and_disposes_pending_registrations() {
        init_test_logging();
        crate::test_phase!("dispose_is_idempotent_and_disposes_pending_registrations");
        let scheduler = inline_scheduler();
        let sleep = Future::new();
        let wait = Future::new();
        scheduler
            .queue_sleep(Instant::now() + Duration::from_secs(60), &sleep)
            .expect("sleep");
        scheduler
            .queue_wait(&WaitHandle::manual(), &wait)
            .expect("wait");
        scheduler.queue_work_item(|| Ok(())).expect("queue");

        scheduler.dispose();
        scheduler.dispose();
        assert!(scheduler.is_disposed());
        assert!(sleep.is_disposed());
        assert!(wait.is_disposed());
        assert!(!scheduler.has_pending_tasks());
        assert_eq!(
            scheduler.step().expect_err("disposed").kind(),
            ErrorKind::SchedulerDisposed
        );
        assert_eq!(
            scheduler
                .queue_work_item(|| Ok(()))
                .expect_err("disposed")
                .kind(),
            ErrorKind::SchedulerDisposed
        );
        let late = scheduler.start(Immediate(1));
        assert_eq!(
            late.error().map(|e| e.kind()),
            Some(ErrorKind::SchedulerDisposed)
        );
    }

    #[test]
    fn single_producer_wait_returns_immediately() {
        init_test_logging();
        let scheduler = SchedulerBuilder::new()
            .thread_safety(ThreadSafety::SingleProducer)
            .thread_pool(Arc::new(InlinePool))
            .build();
        let start = Instant::now();
        assert!(!scheduler.wait_for_work_items(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}

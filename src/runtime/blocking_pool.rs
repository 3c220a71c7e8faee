//! Thread pools for work offloaded with `run_in_thread`.
//!
//! The scheduler never runs blocking calls on the stepping thread. Instead it
//! hands them to a [`ThreadPool`], which is an explicit, injectable object
//! rather than a process-wide global:
//!
//! - [`BlockingPool`] is the default: a FIFO queue served by lazily spawned
//!   OS threads, scaling between `min_threads` and `max_threads`.
//! - [`InlinePool`] runs each job synchronously on the submitting thread,
//!   which makes `run_in_thread` deterministic in tests.
//!
//! ## Thread Lifecycle
//!
//! Threads are spawned lazily up to `max_threads`. When idle beyond
//! `idle_timeout`, threads above `min_threads` are retired.
//!
//! A retiring thread gives up its slot in `active_threads` before its last
//! look at the queue, and `execute` pushes before it reads the count. Both
//! sides fence in between, so either the submitter sees the lower count and
//! spawns a replacement, or the retiring thread sees the job and stays.
//!
//! ## Shutdown
//!
//! After [`BlockingPool::shutdown`] the remaining queue is still drained;
//! new jobs are rejected by running them inline so their futures still settle.

use super::config::BlockingPoolConfig;
use crate::tracing_compat::{debug, warn};
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A job submitted to a thread pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Executes offloaded jobs off the stepping thread.
pub trait ThreadPool: Send + Sync {
    /// Runs `job` at some point, on some thread.
    ///
    /// Implementations must eventually run every job they accept.
    fn execute(&self, job: Job);
}

/// Runs every job immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlinePool;

impl ThreadPool for InlinePool {
    fn execute(&self, job: Job) {
        job();
    }
}

/// The default pool for blocking work.
pub struct BlockingPool {
    inner: Arc<BlockingPoolInner>,
}

struct BlockingPoolInner {
    min_threads: usize,
    max_threads: usize,
    /// Current number of live threads.
    active_threads: AtomicUsize,
    /// Number of threads currently executing work.
    busy_threads: AtomicUsize,
    queue: SegQueue<Job>,
    shutdown: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
    idle_timeout: Duration,
    thread_name_prefix: String,
    next_thread_id: AtomicUsize,
    thread_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BlockingPool {
    /// Creates a pool from `config`, naming threads `{prefix}-blocking-{n}`.
    ///
    /// `min_threads` threads are spawned eagerly.
    #[must_use]
    pub fn new(config: &BlockingPoolConfig, thread_name_prefix: &str) -> Self {
        let max_threads = config.max_threads.max(1).max(config.min_threads);
        let inner = Arc::new(BlockingPoolInner {
            min_threads: config.min_threads,
            max_threads,
            active_threads: AtomicUsize::new(0),
            busy_threads: AtomicUsize::new(0),
            queue: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
            idle_timeout: config.idle_timeout,
            thread_name_prefix: thread_name_prefix.to_string(),
            next_thread_id: AtomicUsize::new(0),
            thread_handles: Mutex::new(Vec::with_capacity(max_threads)),
        });
        for _ in 0..config.min_threads {
            if !spawn_thread_on_inner(&inner) {
                break;
            }
        }
        Self { inner }
    }

    /// Returns the number of queued jobs not yet picked up.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.queue.len()
    }

    /// Returns the number of live threads.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.inner.active_threads.load(Ordering::Acquire)
    }

    /// Returns the number of threads currently executing work.
    #[must_use]
    pub fn busy_threads(&self) -> usize {
        self.inner.busy_threads.load(Ordering::Relaxed)
    }

    /// Returns `true` if the pool is shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Initiates shutdown. Queued jobs still run.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.notify_all();
    }

    /// Shuts down and waits for all threads to exit.
    ///
    /// Returns `true` if all threads exited before `timeout`.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();
        let deadline = Instant::now().checked_add(timeout);
        while self.inner.active_threads.load(Ordering::Acquire) > 0 {
            let remaining =
                deadline.map_or(timeout, |d| d.saturating_duration_since(Instant::now()));
            if remaining.is_zero() {
                return false;
            }
            self.inner.notify_all();
            thread::sleep(Duration::from_millis(10).min(remaining));
        }
        let handles: Vec<_> = self.inner.thread_handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        true
    }
}

impl ThreadPool for BlockingPool {
    fn execute(&self, job: Job) {
        if self.is_shutdown() {
            warn!("blocking pool is shut down, running job inline");
            job();
            return;
        }
        self.inner.queue.push(job);
        fence(Ordering::SeqCst);
        maybe_spawn_thread_on_inner(&self.inner);
        if self.inner.active_threads.load(Ordering::Acquire) == 0 {
            // No thread could be spawned; never strand the job.
            if let Some(job) = self.inner.queue.pop() {
                warn!("no blocking thread available, running job inline");
                job();
            }
            return;
        }
        self.inner.notify_one();
    }
}

impl Drop for BlockingPool {
    fn drop(&mut self) {
        let _ = self.shutdown_and_wait(Duration::from_secs(5));
    }
}

impl fmt::Debug for BlockingPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingPool")
            .field("min_threads", &self.inner.min_threads)
            .field("max_threads", &self.inner.max_threads)
            .field("active_threads", &self.active_threads())
            .field("busy_threads", &self.busy_threads())
            .field("pending_tasks", &self.pending_count())
            .finish()
    }
}

impl BlockingPoolInner {
    fn notify_one(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_one();
    }

    fn notify_all(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

/// Spawns a new thread; returns false if the OS refused.
fn spawn_thread_on_inner(inner: &Arc<BlockingPoolInner>) -> bool {
    let inner_clone = Arc::clone(inner);
    let thread_id = inner.next_thread_id.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}-blocking-{}", inner.thread_name_prefix, thread_id);
    inner.active_threads.fetch_add(1, Ordering::AcqRel);

    let spawned = thread::Builder::new().name(name).spawn(move || {
        let retired = blocking_worker_loop(&inner_clone);
        if !retired {
            inner_clone.active_threads.fetch_sub(1, Ordering::AcqRel);
        }
    });
    match spawned {
        Ok(handle) => {
            let mut handles = inner.thread_handles.lock();
            handles.retain(|h| !h.is_finished());
            handles.push(handle);
            true
        }
        Err(err) => {
            inner.active_threads.fetch_sub(1, Ordering::AcqRel);
            warn!(error = %err, "failed to spawn blocking thread");
            false
        }
    }
}

fn maybe_spawn_thread_on_inner(inner: &Arc<BlockingPoolInner>) {
    let active = inner.active_threads.load(Ordering::Acquire);
    let busy = inner.busy_threads.load(Ordering::Relaxed);
    let pending = inner.queue.len();
    if active < inner.max_threads && busy >= active && pending > 0 {
        spawn_thread_on_inner(inner);
    }
}

/// Releases this thread's slot if the pool stays above `min_threads` and
/// no job arrived in the meantime.
fn try_retire(inner: &BlockingPoolInner) -> bool {
    let released = inner
        .active_threads
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            (n > inner.min_threads).then(|| n - 1)
        })
        .is_ok();
    if !released {
        return false;
    }
    fence(Ordering::SeqCst);
    if inner.queue.is_empty() {
        return true;
    }
    // A submitter may have counted this thread; take the slot back.
    inner.active_threads.fetch_add(1, Ordering::SeqCst);
    false
}

/// Runs jobs until shutdown or retirement. Returns `true` if the thread
/// retired, in which case its slot is already released.
fn blocking_worker_loop(inner: &BlockingPoolInner) -> bool {
    loop {
        if let Some(job) = inner.queue.pop() {
            inner.busy_threads.fetch_add(1, Ordering::Relaxed);
            job();
            inner.busy_threads.fetch_sub(1, Ordering::Relaxed);
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            return false;
        }

        let mut guard = inner.mutex.lock();
        if !inner.queue.is_empty() || inner.shutdown.load(Ordering::Acquire) {
            continue;
        }
        if inner.active_threads.load(Ordering::Acquire) > inner.min_threads {
            let timed_out = inner
                .condvar
                .wait_for(&mut guard, inner.idle_timeout)
                .timed_out();
            if timed_out && inner.queue.is_empty() && try_retire(inner) {
                debug!("retiring idle blocking thread");
                return true;
            }
        } else {
            inner.condvar.wait(&mut guard);
        }
    }
}

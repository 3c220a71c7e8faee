//! Dedicated background thread shared by the sleep and wait workers.
//!
//! A worker thread is spawned lazily on the first registration and parks on
//! a [`WakeEvent`] between rounds. Registering work, cancelling work and
//! shutting down all go through [`WorkerThread::wake`], so the loop only ever
//! has to recheck its own state after waking.

use crate::error::{Error, ErrorKind};
use crate::future::Future;
use crate::sync::WakeEvent;
use crate::tracing_compat::{debug, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Wake and shutdown signals for one worker loop.
#[derive(Debug, Default)]
pub(crate) struct WorkerSignal {
    wake: Arc<WakeEvent>,
    shutdown: AtomicBool,
}

impl WorkerSignal {
    pub(crate) fn wake_event(&self) -> &Arc<WakeEvent> {
        &self.wake
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Owns the OS thread that runs a worker loop.
pub(crate) struct WorkerThread {
    name: String,
    signal: Arc<WorkerSignal>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerThread {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signal: Arc::new(WorkerSignal::default()),
            handle: Mutex::new(None),
        }
    }

    pub(crate) fn signal(&self) -> &Arc<WorkerSignal> {
        &self.signal
    }

    /// Starts the loop if it is not running yet, then wakes it.
    ///
    /// `body` receives the worker's signal and must return once
    /// [`WorkerSignal::is_shutdown`] is observed.
    pub(crate) fn start_and_wake<F>(&self, body: F) -> Result<(), Error>
    where
        F: FnOnce(Arc<WorkerSignal>) + Send + 'static,
    {
        if self.signal.is_shutdown() {
            return Err(Error::scheduler_disposed());
        }
        {
            let mut handle = self.handle.lock();
            if handle.is_none() {
                let signal = Arc::clone(&self.signal);
                let name = self.name.clone();
                let spawned = thread::Builder::new()
                    .name(self.name.clone())
                    .spawn(move || {
                        debug!(worker = %name, "worker thread started");
                        body(signal);
                        debug!(worker = %name, "worker thread exiting");
                    })
                    .map_err(|e| {
                        Error::new(ErrorKind::WorkerSpawnFailed)
                            .with_message(format!("failed to spawn {}", self.name))
                            .with_source(e)
                    })?;
                *handle = Some(spawned);
            }
        }
        self.wake();
        Ok(())
    }

    pub(crate) fn wake(&self) {
        self.signal.wake.set();
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Signals shutdown and joins the thread. Idempotent.
    pub(crate) fn dispose(&self) {
        self.signal.shutdown.store(true, Ordering::Release);
        self.wake();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            // A worker disposing its own scheduler cannot join itself.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Completes a future on behalf of a worker loop.
///
/// The future may have been disposed between leaving the worker's pending
/// set and this call; the future's own state guard rejects that completion.
pub(crate) fn complete_from_worker(future: &Future<()>, worker: &str) {
    if let Err(err) = future.complete(()) {
        warn!(
            worker,
            future_id = future.id(),
            error = %err,
            "worker completion raced a disposal"
        );
    }
}

impl fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerThread")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("shutdown", &self.signal.is_shutdown())
            .finish()
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn spawns_lazily_and_joins_on_dispose() {
        init_test_logging();
        crate::test_phase!("spawns_lazily_and_joins_on_dispose");
        let worker = WorkerThread::new("cotask-test-worker");
        assert!(!worker.is_running());

        let rounds = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&rounds);
        worker
            .start_and_wake(move |signal| {
                while !signal.is_shutdown() {
                    r.fetch_add(1, Ordering::SeqCst);
                    signal.wake_event().wait();
                }
            })
            .expect("spawn");
        assert!(worker.is_running());
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while rounds.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            thread::yield_now();
        }
        assert!(rounds.load(Ordering::SeqCst) >= 1);

        worker.dispose();
        assert!(!worker.is_running());
        worker.dispose();
    }

    #[test]
    fn start_after_dispose_is_rejected() {
        init_test_logging();
        let worker = WorkerThread::new("cotask-test-worker");
        worker.dispose();
        let err = worker.start_and_wake(|_| {}).expect_err("disposed");
        assert_eq!(err.kind(), ErrorKind::SchedulerDisposed);
    }
}

//! Built-in child tasks backed by the background workers.

use crate::error::Error;
use crate::future::Future;
use crate::runtime::{Schedulable, SchedulerHandle};
use crate::sync::WaitHandle;
use std::time::{Duration, Instant};

/// Completes after a deadline, via the sleep worker.
///
/// A relative sleep is measured from the moment it is scheduled, not from
/// construction, so a `Sleep` built ahead of time still waits its full
/// duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sleep {
    target: SleepTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SleepTarget {
    After(Duration),
    At(Instant),
}

impl Sleep {
    /// Sleeps for `duration`, measured from when the sleep is scheduled.
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self {
            target: SleepTarget::After(duration),
        }
    }

    /// Sleeps until `deadline`.
    #[must_use]
    pub fn until(deadline: Instant) -> Self {
        Self {
            target: SleepTarget::At(deadline),
        }
    }

    /// Returns the absolute deadline, if this sleep was built with one.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        match self.target {
            SleepTarget::At(deadline) => Some(deadline),
            SleepTarget::After(_) => None,
        }
    }
}

impl Schedulable for Sleep {
    type Output = ();

    fn schedule(self, scheduler: &SchedulerHandle, future: &Future<()>) {
        let deadline = match self.target {
            SleepTarget::At(deadline) => Some(deadline),
            SleepTarget::After(duration) => Instant::now().checked_add(duration),
        };
        let result = match deadline {
            Some(deadline) => scheduler.queue_sleep(deadline, future),
            // Unrepresentable deadline: the sleep never fires but stays disposable.
            None if scheduler.is_disposed() => Err(Error::scheduler_disposed()),
            None => Ok(()),
        };
        if let Err(err) = result {
            let _ = future.fail(err);
        }
    }
}

/// Completes when a [`WaitHandle`] is signaled, via the wait worker.
#[derive(Debug, Clone)]
pub struct WaitForHandle {
    handle: WaitHandle,
}

impl WaitForHandle {
    /// Waits for `handle`.
    #[must_use]
    pub fn new(handle: WaitHandle) -> Self {
        Self { handle }
    }
}

impl Schedulable for WaitForHandle {
    type Output = ();

    fn schedule(self, scheduler: &SchedulerHandle, future: &Future<()>) {
        if let Err(err) = scheduler.queue_wait(&self.handle, future) {
            let _ = future.fail(err);
        }
    }
}

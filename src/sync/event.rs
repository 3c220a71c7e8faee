//! Auto-reset wake event for background workers.
//!
//! A [`WakeEvent`] is the parking primitive each worker thread sleeps on.
//! Setting it wakes the parked thread; a set that arrives while nobody is
//! waiting is stored, so the next wait returns immediately. Waiting
//! consumes the signal.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A mechanism for parking and waking a worker thread.
#[derive(Debug, Default)]
pub struct WakeEvent {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl WakeEvent {
    /// Creates an unsignaled event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals the event, waking one parked thread.
    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.condvar.notify_one();
    }

    /// Parks the current thread until the event is set.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.condvar.wait(&mut signaled);
        }
        *signaled = false;
    }

    /// Parks the current thread until the event is set or `timeout` elapses.
    ///
    /// Returns `true` if the event was set. A timeout too large to express
    /// as a deadline behaves like [`WakeEvent::wait`].
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.condvar.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *signaled, false)
    }
}

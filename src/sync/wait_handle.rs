//! Signalable wait handles.
//!
//! A [`WaitHandle`] is an event that external code signals from any thread.
//! The scheduler's wait worker watches every registered handle and completes
//! the bound future when the handle fires, which is how code outside the
//! cooperative world (I/O threads, device callbacks, other processes'
//! proxies) wakes a suspended coroutine.
//!
//! Handles come in two flavors:
//!
//! - [`ResetMode::Manual`]: stays signaled until [`WaitHandle::reset`].
//! - [`ResetMode::Auto`]: each signal releases exactly one observer and then
//!   clears itself.

use crate::sync::WakeEvent;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// How a signaled handle returns to the unsignaled state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetMode {
    /// Remains signaled until explicitly reset.
    #[default]
    Manual,
    /// Clears itself when one observer consumes the signal.
    Auto,
}

struct HandleState {
    signaled: bool,
    /// Worker events to poke when the handle is set.
    watchers: Vec<Weak<WakeEvent>>,
}

struct WaitHandleInner {
    mode: ResetMode,
    state: Mutex<HandleState>,
    condvar: Condvar,
}

/// An event that can be signaled from any thread and awaited by the
/// scheduler's wait worker.
#[derive(Clone)]
pub struct WaitHandle {
    inner: Arc<WaitHandleInner>,
}

impl WaitHandle {
    /// Creates an unsignaled handle with the given reset mode.
    #[must_use]
    pub fn new(mode: ResetMode) -> Self {
        Self {
            inner: Arc::new(WaitHandleInner {
                mode,
                state: Mutex::new(HandleState {
                    signaled: false,
                    watchers: Vec::new(),
                }),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Creates an unsignaled manual-reset handle.
    #[must_use]
    pub fn manual() -> Self {
        Self::new(ResetMode::Manual)
    }

    /// Creates an unsignaled auto-reset handle.
    #[must_use]
    pub fn auto() -> Self {
        Self::new(ResetMode::Auto)
    }

    /// Returns the reset mode.
    #[must_use]
    pub fn mode(&self) -> ResetMode {
        self.inner.mode
    }

    /// Signals the handle and wakes every watcher.
    pub fn set(&self) {
        let watchers: Vec<Arc<WakeEvent>> = {
            let mut state = self.inner.state.lock();
            state.signaled = true;
            state.watchers.retain(|w| w.strong_count() > 0);
            state.watchers.iter().filter_map(Weak::upgrade).collect()
        };
        self.inner.condvar.notify_all();
        for watcher in watchers {
            watcher.set();
        }
    }

    /// Returns the handle to the unsignaled state.
    pub fn reset(&self) {
        self.inner.state.lock().signaled = false;
    }

    /// Returns true if the handle is currently signaled.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner.state.lock().signaled
    }

    /// Blocks the calling thread until the handle is signaled or `timeout`
    /// elapses. Consumes the signal of an auto-reset handle.
    ///
    /// Returns `true` if the handle was signaled. Never call this on the
    /// stepping thread; suspend the coroutine with
    /// [`Yielded::wait_for`](crate::task::Yielded::wait_for) instead.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.inner.state.lock();
        while !state.signaled {
            let Some(deadline) = deadline else {
                self.inner.condvar.wait(&mut state);
                continue;
            };
            if self
                .inner
                .condvar
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        let signaled = state.signaled;
        if signaled && self.inner.mode == ResetMode::Auto {
            state.signaled = false;
        }
        signaled
    }

    /// Checks the signal without blocking, consuming it for auto-reset handles.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut state = self.inner.state.lock();
        let signaled = state.signaled;
        if signaled && self.inner.mode == ResetMode::Auto {
            state.signaled = false;
        }
        signaled
    }

    /// Registers `event` to be set whenever this handle is signaled.
    pub(crate) fn watch(&self, event: &Arc<WakeEvent>) {
        let mut state = self.inner.state.lock();
        let already = state
            .watchers
            .iter()
            .any(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(event)));
        if !already {
            state.watchers.push(Arc::downgrade(event));
        }
    }
}

impl Default for WaitHandle {
    fn default() -> Self {
        Self::manual()
    }
}

impl fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitHandle")
            .field("mode", &self.inner.mode)
            .field("signaled", &self.is_set())
            .finish()
    }
}

//! Synchronization primitives shared by the scheduler and its workers.
//!
//! - [`WakeEvent`]: auto-reset parking event each background worker sleeps on
//! - [`WaitHandle`]: externally signaled event the wait worker multiplexes

mod event;
mod wait_handle;

pub use event::WakeEvent;
pub use wait_handle::{ResetMode, WaitHandle};

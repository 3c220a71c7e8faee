//! FIFO queue of pending work items.
//!
//! The job queue is the only place cooperative work waits to run. Producers
//! append with [`JobQueue::queue_work_item`]; the stepping thread drains a
//! bounded batch per tick with [`JobQueue::run_batch`]. Items appended while a
//! batch is running land behind the batch and wait for the next tick, which
//! keeps a self-requeueing step from spinning inside a single tick.
//!
//! Storage is a lock-free `SegQueue`, so producers on any thread are always
//! memory-safe. [`ThreadSafety`] only decides whether producers also signal
//! threads blocked in [`JobQueue::wait_for_work_items`].

use crate::error::Error;
use crate::tracing_compat::error;
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::time::{Duration, Instant};

/// A unit of cooperative work.
///
/// Returning an error reports it from the [`step`](crate::SchedulerHandle::step)
/// that ran the item.
pub type WorkItem = Box<dyn FnOnce() -> Result<(), Error> + Send + 'static>;

/// Producer model of a job queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadSafety {
    /// Producers on any thread; idle consumers may block waiting for work.
    #[default]
    Concurrent,
    /// Producers on the stepping thread only; waiting never blocks.
    SingleProducer,
}

/// A FIFO job queue.
pub struct JobQueue {
    items: SegQueue<WorkItem>,
    mode: ThreadSafety,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl JobQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(mode: ThreadSafety) -> Self {
        Self {
            items: SegQueue::new(),
            mode,
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Returns the producer model.
    #[must_use]
    pub fn thread_safety(&self) -> ThreadSafety {
        self.mode
    }

    /// Appends a work item.
    pub fn queue_work_item(&self, item: WorkItem) {
        self.items.push(item);
        if self.mode == ThreadSafety::Concurrent {
            let _guard = self.mutex.lock();
            self.condvar.notify_all();
        }
    }

    /// Returns the number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Runs the items present at call start, in order.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by an item; see [`JobQueue::run_batch`].
    pub fn step(&self) -> Result<usize, Error> {
        self.run_batch(self.len())
    }

    /// Runs at most `budget` items from the front of the queue.
    ///
    /// Every item in the batch runs even if an earlier one fails.
    /// Returns the number of items executed.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by an item. Later errors in the same
    /// batch are logged.
    pub fn run_batch(&self, budget: usize) -> Result<usize, Error> {
        let mut executed = 0;
        let mut first_error = None;
        while executed < budget {
            let Some(item) = self.items.pop() else {
                break;
            };
            executed += 1;
            if let Err(err) = item() {
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    error!(error = %err, "additional work item failure in the same batch");
                }
            }
        }
        first_error.map_or(Ok(executed), Err)
    }

    /// Blocks until an item is queued or `timeout` elapses.
    ///
    /// Returns whether work is available. In
    /// [`ThreadSafety::SingleProducer`] mode this never blocks. A timeout too
    /// large to express as a deadline waits without one.
    pub fn wait_for_work_items(&self, timeout: Duration) -> bool {
        if !self.is_empty() || self.mode == ThreadSafety::SingleProducer {
            return !self.is_empty();
        }
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = self.mutex.lock();
        while self.is_empty() {
            match deadline {
                Some(deadline) => {
                    if self.condvar.wait_until(&mut guard, deadline).timed_out() {
                        break;
                    }
                }
                None => self.condvar.wait(&mut guard),
            }
        }
        !self.is_empty()
    }

    /// Wakes every thread blocked in [`JobQueue::wait_for_work_items`].
    pub(crate) fn notify_waiters(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }

    /// Drops every queued item without running it.
    pub fn clear(&self) {
        while self.items.pop().is_some() {}
        self.notify_waiters();
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(ThreadSafety::default())
    }
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("mode", &self.mode)
            .field("len", &self.len())
            .finish()
    }
}

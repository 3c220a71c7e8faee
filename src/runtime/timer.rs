//! Sleep worker: completes futures at their deadlines.
//!
//! Pending sleeps live in a min-heap ordered by deadline, with an insertion
//! sequence number as tiebreak so equal deadlines fire in registration order.
//! The worker thread peeks the earliest entry and parks until it is due:
//!
//! ```text
//! wait = max(remaining + sleep_margin, min_sleep)
//! ```
//!
//! The margin absorbs timer jitter so a wakeup rarely lands just before the
//! deadline, and the minimum quantum keeps the thread from spinning on
//! deadlines that are almost due. A registration or cancellation wakes the
//! thread early so it can recompute.

use super::worker::{complete_from_worker, WorkerSignal, WorkerThread};
use crate::error::Error;
use crate::future::Future;
use crate::tracing_compat::trace;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct SleepEntry {
    deadline: Instant,
    id: u64,
    future: Future<()>,
}

impl PartialEq for SleepEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for SleepEntry {}

impl Ord for SleepEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for SleepEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of sleep registrations ordered by deadline.
#[derive(Default)]
pub(crate) struct SleepHeap {
    heap: BinaryHeap<SleepEntry>,
    next_id: u64,
}

impl SleepHeap {
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Adds a registration and returns its id.
    pub(crate) fn insert(&mut self, deadline: Instant, future: Future<()>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(SleepEntry {
            deadline,
            id,
            future,
        });
        id
    }

    pub(crate) fn peek_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pops every registration whose deadline is at or before `now`.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Vec<Future<()>> {
        let mut expired = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline <= now {
                if let Some(entry) = self.heap.pop() {
                    expired.push(entry.future);
                }
            } else {
                break;
            }
        }
        expired
    }

    /// Removes a registration. Returns false if it already fired.
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        let before = self.heap.len();
        self.heap.retain(|e| e.id != id);
        self.heap.len() != before
    }

    pub(crate) fn drain(&mut self) -> Vec<Future<()>> {
        self.heap.drain().map(|e| e.future).collect()
    }
}

/// Wake-time tuning for the sleep worker.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SleepTiming {
    pub(crate) margin: Duration,
    pub(crate) min_sleep: Duration,
}

impl SleepTiming {
    /// How long to park when the earliest deadline is `remaining` away.
    pub(crate) fn park_duration(self, remaining: Duration) -> Duration {
        remaining.saturating_add(self.margin).max(self.min_sleep)
    }
}

/// Background thread that completes sleep futures.
pub(crate) struct SleepWorker {
    heap: Arc<Mutex<SleepHeap>>,
    timing: SleepTiming,
    thread: WorkerThread,
}

impl SleepWorker {
    pub(crate) fn new(thread_name: String, timing: SleepTiming) -> Self {
        Self {
            heap: Arc::new(Mutex::new(SleepHeap::default())),
            timing,
            thread: WorkerThread::new(thread_name),
        }
    }

    /// Registers `future` to complete at `deadline` and wakes the worker.
    pub(crate) fn queue(&self, deadline: Instant, future: &Future<()>) -> Result<u64, Error> {
        let id = self.heap.lock().insert(deadline, future.clone());
        let heap = Arc::clone(&self.heap);
        let timing = self.timing;
        if let Err(err) = self
            .thread
            .start_and_wake(move |signal| sleep_loop(&heap, timing, &signal))
        {
            self.heap.lock().remove(id);
            return Err(err);
        }
        Ok(id)
    }

    /// Drops a registration before it fires.
    pub(crate) fn cancel(&self, id: u64) -> bool {
        let removed = self.heap.lock().remove(id);
        if removed {
            self.thread.wake();
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// Stops the thread and hands back every registration that never fired.
    pub(crate) fn dispose(&self) -> Vec<Future<()>> {
        self.thread.dispose();
        self.heap.lock().drain()
    }
}

impl fmt::Debug for SleepWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SleepWorker")
            .field("pending", &self.len())
            .field("timing", &self.timing)
            .field("thread", &self.thread)
            .finish()
    }
}

fn sleep_loop(heap: &Mutex<SleepHeap>, timing: SleepTiming, signal: &WorkerSignal) {
    while !signal.is_shutdown() {
        let now = Instant::now();
        let (expired, next) = {
            let mut heap = heap.lock();
            (heap.pop_expired(now), heap.peek_deadline())
        };
        if !expired.is_empty() {
            trace!(count = expired.len(), "sleep worker firing expired sleeps");
            for future in &expired {
                complete_from_worker(future, "sleep");
            }
            continue;
        }
        match next {
            None => signal.wake_event().wait(),
            Some(deadline) => {
                let park = timing.park_duration(deadline.saturating_duration_since(now));
                trace!(park_us = park.as_micros() as u64, "sleep worker parking");
                signal.wake_event().wait_timeout(park);
            }
        }
    }
}

//! Wait worker: completes futures when their [`WaitHandle`] signals.
//!
//! Every registered handle is told to set the worker's wake event when it is
//! signaled, so one park covers the whole registration list. After each
//! wakeup the worker sweeps the list, pulls out the entries whose handles
//! are signaled and completes their futures outside the lock. A wakeup with
//! nothing signaled just means the registration set changed.

use super::worker::{complete_from_worker, WorkerSignal, WorkerThread};
use crate::error::Error;
use crate::future::Future;
use crate::sync::WaitHandle;
use crate::tracing_compat::trace;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

struct WaitEntry {
    id: u64,
    handle: WaitHandle,
    future: Future<()>,
}

/// Registration list owned by the wait worker.
#[derive(Default)]
pub(crate) struct WaitList {
    entries: Vec<WaitEntry>,
    next_id: u64,
}

impl WaitList {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn insert(&mut self, handle: WaitHandle, future: Future<()>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(WaitEntry { id, handle, future });
        id
    }

    pub(crate) fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Removes and returns the entries whose handles are signaled, in
    /// registration order. An auto-reset handle releases one entry per set.
    pub(crate) fn take_signaled(&mut self) -> Vec<Future<()>> {
        let mut fired = Vec::new();
        self.entries.retain(|entry| {
            if entry.handle.try_acquire() {
                fired.push(entry.future.clone());
                false
            } else {
                true
            }
        });
        fired
    }

    pub(crate) fn drain(&mut self) -> Vec<Future<()>> {
        self.entries.drain(..).map(|e| e.future).collect()
    }
}

/// Background thread that completes wait futures.
pub(crate) struct WaitWorker {
    list: Arc<Mutex<WaitList>>,
    thread: WorkerThread,
}

impl WaitWorker {
    pub(crate) fn new(thread_name: String) -> Self {
        Self {
            list: Arc::new(Mutex::new(WaitList::default())),
            thread: WorkerThread::new(thread_name),
        }
    }

    /// Registers `future` to complete when `handle` signals and wakes the worker.
    pub(crate) fn queue(&self, handle: &WaitHandle, future: &Future<()>) -> Result<u64, Error> {
        let id = self.list.lock().insert(handle.clone(), future.clone());
        handle.watch(self.thread.signal().wake_event());
        let list = Arc::clone(&self.list);
        if let Err(err) = self
            .thread
            .start_and_wake(move |signal| wait_loop(&list, &signal))
        {
            self.list.lock().remove(id);
            return Err(err);
        }
        Ok(id)
    }

    /// Drops a registration before its handle signals.
    pub(crate) fn cancel(&self, id: u64) -> bool {
        let removed = self.list.lock().remove(id);
        if removed {
            self.thread.wake();
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.list.lock().len()
    }

    /// Stops the thread and hands back every registration that never fired.
    pub(crate) fn dispose(&self) -> Vec<Future<()>> {
        self.thread.dispose();
        self.list.lock().drain()
    }
}

impl fmt::Debug for WaitWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitWorker")
            .field("pending", &self.len())
            .field("thread", &self.thread)
            .finish()
    }
}

fn wait_loop(list: &Mutex<WaitList>, signal: &WorkerSignal) {
    while !signal.is_shutdown() {
        let (fired, waiting) = {
            let mut list = list.lock();
            let fired = list.take_signaled();
            (fired, list.len())
        };
        if !fired.is_empty() {
            for future in &fired {
                complete_from_worker(future, "wait");
            }
            continue;
        }
        trace!(handles = waiting, "wait worker waiting on {} handle(s)", waiting);
        signal.wake_event().wait();
    }
}

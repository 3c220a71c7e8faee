//! The coroutine driver state machine.
//!
//! ```text
//!            ┌──────────── requeue (Yield / Nothing / NextValue) ──┐
//!            ▼                                                     │
//!  start ─► Running ──► WaitingOnFuture ── settled ──► Running ────┘
//!            │   └────► WaitingForTick ─── listener ─► Running
//!            ├──► Completed   (Result, exhaustion, failure)
//!            └──► Disposed    (owning future or wake condition disposed)
//! ```
//!
//! Each step resumes the coroutine exactly once. The coroutine is taken out
//! of the driver's state for the duration of `resume`, so a disposal that
//! arrives mid-step only has to flip the phase; the step notices on return
//! and drops the coroutine without touching the owning future again.

use super::coroutine::{Coroutine, Yielded};
use super::NextValueHandler;
use crate::error::Error;
use crate::future::{AnyFuture, Future};
use crate::runtime::SchedulerHandle;
use crate::tracing_compat::{debug, trace, warn};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Running,
    WaitingOnFuture,
    WaitingForTick,
    Completed,
    Disposed,
}

impl Phase {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Disposed)
    }
}

struct DriverState<C: Coroutine> {
    coroutine: Option<C>,
    future: Option<Future<Option<C::Output>>>,
    wake_condition: Option<AnyFuture>,
    on_next_value: Option<NextValueHandler>,
    phase: Phase,
}

/// Everything a terminal transition takes out of the state.
struct Released<C: Coroutine> {
    coroutine: Option<C>,
    future: Option<Future<Option<C::Output>>>,
    wake_condition: Option<AnyFuture>,
    on_next_value: Option<NextValueHandler>,
}

pub(crate) struct Driver<C: Coroutine> {
    scheduler: SchedulerHandle,
    task_id: u64,
    state: Mutex<DriverState<C>>,
}

impl<C: Coroutine> Driver<C> {
    /// Creates the driver for `future` and queues its first step.
    pub(crate) fn launch(
        coroutine: C,
        on_next_value: Option<NextValueHandler>,
        scheduler: &SchedulerHandle,
        future: &Future<Option<C::Output>>,
    ) {
        let driver = Arc::new(Self {
            scheduler: scheduler.clone(),
            task_id: future.id(),
            state: Mutex::new(DriverState {
                coroutine: Some(coroutine),
                future: Some(future.clone()),
                wake_condition: None,
                on_next_value,
                phase: Phase::Running,
            }),
        });
        let weak = Arc::downgrade(&driver);
        future.register_on_dispose(move || {
            if let Some(driver) = weak.upgrade() {
                debug!(task_id = driver.task_id, "future disposed, aborting");
                driver.dispose();
            }
        });
        driver.queue_step();
    }

    #[cfg(test)]
    fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    fn queue_step(self: &Arc<Self>) {
        let driver = Arc::clone(self);
        let queued = self.scheduler.queue_work_item(move || {
            driver.step();
            Ok(())
        });
        if let Err(err) = queued {
            debug!(task_id = self.task_id, error = %err, "cannot queue step, disposing task");
            self.dispose();
        }
    }

    fn step(self: &Arc<Self>) {
        let mut coroutine = {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                return;
            }
            let Some(coroutine) = state.coroutine.take() else {
                return;
            };
            state.phase = Phase::Running;
            state.wake_condition = None;
            coroutine
        };

        let resumed = coroutine.resume();

        {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                drop(state);
                drop(coroutine);
                trace!(task_id = self.task_id, "task disposed during step");
                return;
            }
            state.coroutine = Some(coroutine);
        }
        self.advance(resumed);
    }

    fn advance(self: &Arc<Self>, resumed: Result<Option<Yielded<C::Output>>, Error>) {
        match resumed {
            Err(err) => {
                debug!(task_id = self.task_id, error = %err, "task failed");
                self.finish(Err(err));
            }
            Ok(None) => {
                debug!(task_id = self.task_id, "task exhausted without a result");
                self.finish(Ok(None));
            }
            Ok(Some(yielded)) => self.interpret(yielded),
        }
    }

    fn interpret(self: &Arc<Self>, yielded: Yielded<C::Output>) {
        match yielded {
            Yielded::Start { task, policy } => {
                let child = task.start_boxed(&self.scheduler, policy);
                trace!(task_id = self.task_id, child_id = child.id(), "waiting on child task");
                self.suspend_on(child);
            }
            Yielded::Yield | Yielded::Nothing => self.requeue(),
            Yielded::NextTick => self.wait_for_tick(),
            Yielded::NextValue(payload) => self.publish(payload),
            Yielded::Wait(future) => self.suspend_on(future),
            Yielded::Result(value) => {
                debug!(task_id = self.task_id, "task completed");
                self.finish(Ok(Some(value)));
            }
            Yielded::Bare(_) => {
                warn!(task_id = self.task_id, "task yielded an unsupported value");
                self.finish(Err(Error::unsupported_yield(
                    "task directly yielded a value; yield Yielded::Result to produce a result",
                )));
            }
        }
    }

    fn publish(self: &Arc<Self>, payload: Box<dyn std::any::Any + Send>) {
        let handler = self.state.lock().on_next_value.take();
        let Some(mut handler) = handler else {
            self.requeue();
            return;
        };
        let response = handler(payload);
        let leftover = {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                Some(handler)
            } else {
                state.on_next_value = Some(handler);
                None
            }
        };
        drop(leftover);
        match response {
            Ok(Some(ack)) => self.suspend_on(ack),
            Ok(None) => self.requeue(),
            Err(err) => {
                warn!(task_id = self.task_id, error = %err, "external value rejected");
                self.finish(Err(err));
            }
        }
    }

    fn requeue(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                return;
            }
            state.phase = Phase::Running;
        }
        self.queue_step();
    }

    fn wait_for_tick(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                return;
            }
            state.phase = Phase::WaitingForTick;
        }
        let driver = Arc::clone(self);
        let registered = self
            .scheduler
            .add_step_listener(move || driver.queue_step());
        if let Err(err) = registered {
            debug!(task_id = self.task_id, error = %err, "cannot wait for tick, disposing task");
            self.dispose();
        }
    }

    fn suspend_on(self: &Arc<Self>, wake: AnyFuture) {
        {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                return;
            }
            state.phase = Phase::WaitingOnFuture;
            state.wake_condition = Some(wake.clone());
        }
        let wake_id = wake.id();

        let driver = Arc::clone(self);
        wake.register_on_settled(move || driver.on_wake_settled(wake_id));

        let weak = Arc::downgrade(self);
        wake.register_on_dispose(move || {
            if let Some(driver) = weak.upgrade() {
                driver.on_wake_disposed(wake_id);
            }
        });
    }

    fn on_wake_settled(self: &Arc<Self>, wake_id: u64) {
        {
            let mut state = self.state.lock();
            let current = state.wake_condition.as_ref().map(AnyFuture::id);
            if state.phase != Phase::WaitingOnFuture || current != Some(wake_id) {
                return;
            }
            state.wake_condition = None;
            state.phase = Phase::Running;
        }
        self.queue_step();
    }

    fn on_wake_disposed(&self, wake_id: u64) {
        let matches = {
            let state = self.state.lock();
            state.phase == Phase::WaitingOnFuture
                && state.wake_condition.as_ref().map(AnyFuture::id) == Some(wake_id)
        };
        if matches {
            debug!(task_id = self.task_id, wake_id, "wake condition disposed, aborting");
            self.dispose();
        }
    }

    fn release(&self, phase: Phase) -> Option<Released<C>> {
        let mut state = self.state.lock();
        if state.phase.is_terminal() {
            return None;
        }
        state.phase = phase;
        Some(Released {
            coroutine: state.coroutine.take(),
            future: state.future.take(),
            wake_condition: state.wake_condition.take(),
            on_next_value: state.on_next_value.take(),
        })
    }

    fn finish(&self, outcome: Result<Option<C::Output>, Error>) {
        let Some(released) = self.release(Phase::Completed) else {
            return;
        };
        let Released {
            coroutine,
            future,
            wake_condition,
            on_next_value,
        } = released;
        drop(coroutine);
        drop(on_next_value);
        if let Some(wake) = wake_condition {
            wake.dispose();
        }
        if let Some(future) = future {
            let settled = match outcome {
                Ok(value) => future.complete(value),
                Err(err) => future.fail(err),
            };
            if let Err(err) = settled {
                trace!(task_id = self.task_id, error = %err, "owning future already terminal");
            }
        }
    }

    /// Cancels the task. Safe to call from inside a step or a callback.
    pub(crate) fn dispose(&self) {
        let Some(released) = self.release(Phase::Disposed) else {
            return;
        };
        trace!(task_id = self.task_id, "task disposed");
        let Released {
            coroutine,
            future,
            wake_condition,
            on_next_value,
        } = released;
        drop(coroutine);
        drop(on_next_value);
        if let Some(wake) = wake_condition {
            wake.dispose();
        }
        if let Some(future) = future {
            future.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{InlinePool, SchedulerBuilder, TaskScheduler};
    use crate::task::from_fn;
    use crate::test_utils::init_test_logging;

    fn scheduler() -> TaskScheduler {
        SchedulerBuilder::new()
            .thread_pool(Arc::new(InlinePool))
            .build()
    }

    #[test]
    fn phases_follow_suspension_intents() {
        init_test_logging();
        crate::test_phase!("phases_follow_suspension_intents");
        let scheduler = scheduler();
        let gate: Future<()> = Future::new();
        let waiting_on = gate.clone();
        let mut step = 0;
        let coroutine = from_fn(move || {
            step += 1;
            Ok(Some(match step {
                1 => Yielded::wait(&waiting_on),
                2 => Yielded::NextTick,
                _ => Yielded::Result(step),
            }))
        });
        let future = Future::new();
        let driver = Arc::new(Driver {
            scheduler: scheduler.handle(),
            task_id: future.id(),
            state: Mutex::new(DriverState {
                coroutine: Some(coroutine),
                future: Some(future.clone()),
                wake_condition: None,
                on_next_value: None,
                phase: Phase::Running,
            }),
        });
        driver.queue_step();
        assert_eq!(driver.phase(), Phase::Running);

        scheduler.step().expect("tick");
        assert_eq!(driver.phase(), Phase::WaitingOnFuture);

        gate.complete(()).expect("gate");
        assert_eq!(driver.phase(), Phase::Running);
        scheduler.step().expect("tick");
        assert_eq!(driver.phase(), Phase::WaitingForTick);

        scheduler.step().expect("listener tick");
        scheduler.step().expect("resume tick");
        assert_eq!(driver.phase(), Phase::Completed);
        assert_eq!(future.value(), Some(Some(3)));
    }

    #[test]
    fn dispose_is_idempotent_and_releases_wake_condition() {
        init_test_logging();
        let scheduler = scheduler();
        let gate: Future<()> = Future::new();
        let waiting_on = gate.clone();
        let future = scheduler.start_coroutine(from_fn(move || {
            Ok(Some(Yielded::<()>::wait(&waiting_on)))
        }));
        scheduler.step().expect("tick");

        future.dispose();
        assert!(gate.is_disposed());
        future.dispose();
        assert!(!scheduler.has_pending_tasks());
    }
}

//! Real-time tests for the sleep and wait workers.

mod common;

use common::*;
use cotask::{from_iter, Future, SchedulerBuilder, Sleep, WaitForHandle, WaitHandle, Yielded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DRIVE_TIMEOUT: Duration = Duration::from_secs(5);

fn settle_within(future: &Future<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while future.is_pending() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}

#[test]
fn sleep_never_fires_before_its_deadline() {
    init_test_logging();
    test_phase!("sleep_never_fires_before_its_deadline");
    let scheduler = inline_scheduler();
    let started = Instant::now();
    let future = scheduler.start(Sleep::new(Duration::from_millis(40)));
    let fired_at = Arc::new(Mutex::new(None));
    {
        let fired_at = Arc::clone(&fired_at);
        future.register_on_complete(move |_| *fired_at.lock() = Some(Instant::now()));
    }
    assert!(future.is_pending());
    assert_eq!(scheduler.pending_sleeps(), 1);

    assert!(settle_within(&future, DRIVE_TIMEOUT));
    let fired_at = (*fired_at.lock()).expect("fired");
    let deadline = started + Duration::from_millis(40);
    assert!(fired_at >= deadline, "fired {:?} early", deadline - fired_at);
    assert_eq!(scheduler.pending_sleeps(), 0);
    test_complete!("sleep_never_fires_before_its_deadline");
}

#[test]
fn sleeps_fire_in_deadline_order() {
    init_test_logging();
    let scheduler = inline_scheduler();
    let order = Arc::new(Mutex::new(Vec::new()));
    let futures: Vec<Future<()>> = [60_u64, 20, 40]
        .iter()
        .enumerate()
        .map(|(index, ms)| {
            let future = scheduler.start(Sleep::new(Duration::from_millis(*ms)));
            let order = Arc::clone(&order);
            future.register_on_complete(move |_| order.lock().push(index));
            future
        })
        .collect();

    for future in &futures {
        assert!(settle_within(future, DRIVE_TIMEOUT));
    }
    assert_eq!(*order.lock(), vec![1, 2, 0]);
}

#[test]
fn coroutine_sleep_resumes_after_duration() {
    init_test_logging();
    let scheduler = SchedulerBuilder::new()
        .thread_pool(Arc::new(cotask::InlinePool))
        .min_sleep(Duration::from_micros(500))
        .build();
    let started = Instant::now();
    let future = scheduler.start_coroutine(from_iter([
        Yielded::sleep(Duration::from_millis(30)),
        Yielded::Result(()),
    ]));
    let (done, errors) = drive_until(&scheduler, DRIVE_TIMEOUT, || future.is_settled());
    assert!(done);
    assert!(errors.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[test]
fn consecutive_coroutine_sleeps_each_wait_their_full_duration() {
    init_test_logging();
    test_phase!("consecutive_coroutine_sleeps_each_wait_their_full_duration");
    let scheduler = inline_scheduler();
    let started = Instant::now();
    let future = scheduler.start_coroutine(from_iter([
        Yielded::sleep(Duration::from_millis(60)),
        Yielded::sleep(Duration::from_millis(60)),
        Yielded::Result(()),
    ]));
    let (done, errors) = drive_until(&scheduler, DRIVE_TIMEOUT, || future.is_settled());
    assert!(done);
    assert!(errors.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(120));
    test_complete!("consecutive_coroutine_sleeps_each_wait_their_full_duration");
}

#[test]
fn disposed_sleep_never_completes() {
    init_test_logging();
    let scheduler = inline_scheduler();
    let cancelled = scheduler.start(Sleep::new(Duration::from_millis(10)));
    let kept = scheduler.start(Sleep::new(Duration::from_millis(30)));
    cancelled.dispose();
    assert_eq!(scheduler.pending_sleeps(), 1);

    assert!(settle_within(&kept, DRIVE_TIMEOUT));
    assert!(cancelled.is_disposed());
}

#[test]
fn wait_handle_wakes_suspended_coroutine() {
    init_test_logging();
    test_phase!("wait_handle_wakes_suspended_coroutine");
    let scheduler = inline_scheduler();
    let handle = WaitHandle::auto();
    let future = scheduler.start_coroutine(from_iter([
        Yielded::wait_for(&handle),
        Yielded::Result("signaled"),
    ]));
    scheduler.step().expect("tick");
    assert_eq!(scheduler.pending_waits(), 1);

    let signaler = {
        let handle = handle.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            handle.set();
        })
    };
    let (done, _) = drive_until(&scheduler, DRIVE_TIMEOUT, || future.is_settled());
    signaler.join().expect("signaler");
    assert!(done);
    assert_eq!(future.value(), Some(Some("signaled")));
    assert!(!handle.is_set(), "auto-reset signal should be consumed");
    assert_eq!(scheduler.pending_waits(), 0);
}

#[test]
fn manual_handle_releases_every_waiter() {
    init_test_logging();
    let scheduler = inline_scheduler();
    let handle = WaitHandle::manual();
    let first = scheduler.start(WaitForHandle::new(handle.clone()));
    let second = scheduler.start(WaitForHandle::new(handle.clone()));
    handle.set();
    assert!(settle_within(&first, DRIVE_TIMEOUT));
    assert!(settle_within(&second, DRIVE_TIMEOUT));
    assert!(handle.is_set());
}

#[test]
fn already_signaled_handle_completes_promptly() {
    init_test_logging();
    let scheduler = inline_scheduler();
    let handle = WaitHandle::manual();
    handle.set();
    let future = scheduler.start(WaitForHandle::new(handle));
    assert!(settle_within(&future, DRIVE_TIMEOUT));
}

#[test]
fn disposed_wait_is_not_completed_by_later_signal() {
    init_test_logging();
    test_phase!("disposed_wait_is_not_completed_by_later_signal");
    let scheduler = inline_scheduler();
    let handle = WaitHandle::auto();
    let future = scheduler.start(WaitForHandle::new(handle.clone()));
    assert_eq!(scheduler.pending_waits(), 1);

    future.dispose();
    assert_eq!(scheduler.pending_waits(), 0);
    handle.set();
    std::thread::sleep(Duration::from_millis(20));

    assert!(future.is_disposed());
    assert!(handle.is_set(), "nobody should have consumed the signal");
}

#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use cotask::{InlinePool, SchedulerBuilder, SchedulerHandle, TaskScheduler};
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

const PROPTEST_SEED_ENV: &str = "COTASK_PROPTEST_SEED";

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    // Honor an explicit PROPTEST_RNG_SEED, otherwise apply our own.
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }
    if std::env::var("CI").is_ok() {
        return Some(DEFAULT_PROPTEST_SEED);
    }
    None
}

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// A scheduler whose offloaded work runs inline on the calling thread.
#[must_use]
pub fn inline_scheduler() -> TaskScheduler {
    SchedulerBuilder::new()
        .thread_name_prefix("cotask-test")
        .thread_pool(Arc::new(InlinePool))
        .build()
}

/// Steps `scheduler` until `done` returns true or `timeout` elapses.
///
/// Step errors are collected and returned alongside the outcome so tests
/// can assert on re-raised background failures.
pub fn drive_until(
    scheduler: &SchedulerHandle,
    timeout: Duration,
    mut done: impl FnMut() -> bool,
) -> (bool, Vec<cotask::Error>) {
    let deadline = Instant::now() + timeout;
    let mut errors = Vec::new();
    loop {
        if done() {
            return (true, errors);
        }
        let now = Instant::now();
        if now >= deadline {
            return (false, errors);
        }
        if let Err(err) = scheduler.step() {
            tracing::debug!(error = %err, "step returned an error");
            errors.push(err);
        }
        if !scheduler.has_pending_tasks() {
            let _ = scheduler.wait_for_work_items((deadline - now).min(Duration::from_millis(5)));
        }
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
}

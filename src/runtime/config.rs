//! Scheduler configuration types.
//!
//! These types hold the concrete values that drive scheduler behavior. In
//! most cases you should use [`SchedulerBuilder`](super::builder::SchedulerBuilder)
//! rather than creating a [`SchedulerConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `thread_safety` | [`ThreadSafety::Concurrent`] |
//! | `sleep_margin` | 10 µs |
//! | `min_sleep` | 1.5 ms |
//! | `thread_name_prefix` | `"cotask"` |
//! | `blocking.min_threads` | 0 |
//! | `blocking.max_threads` | available CPU parallelism |
//! | `blocking.idle_timeout` | 10 s |

use super::job_queue::ThreadSafety;
use super::timer::SleepTiming;
use std::time::Duration;

/// Default jitter margin added to every sleep-worker wake time.
pub const DEFAULT_SLEEP_MARGIN: Duration = Duration::from_micros(10);
/// Default minimum sleep quantum of the sleep worker.
pub const DEFAULT_MIN_SLEEP: Duration = Duration::from_micros(1500);
/// Default idle timeout before retiring excess blocking threads.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_THREAD_NAME_PREFIX: &str = "cotask";

/// Configuration for the blocking pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockingPoolConfig {
    /// Minimum number of blocking threads.
    pub min_threads: usize,
    /// Maximum number of blocking threads.
    pub max_threads: usize,
    /// Idle time after which threads above `min_threads` retire.
    pub idle_timeout: Duration,
}

impl BlockingPoolConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.max_threads == 0 {
            self.max_threads = 1;
        }
        if self.max_threads < self.min_threads {
            self.max_threads = self.min_threads;
        }
    }
}

impl Default for BlockingPoolConfig {
    fn default() -> Self {
        Self {
            min_threads: 0,
            max_threads: SchedulerConfig::default_blocking_threads(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Producer model of the job queue.
    pub thread_safety: ThreadSafety,
    /// Margin added to every computed sleep-worker wake time.
    pub sleep_margin: Duration,
    /// Minimum time the sleep worker parks while a sleep is pending.
    pub min_sleep: Duration,
    /// Name prefix for worker and blocking threads.
    pub thread_name_prefix: String,
    /// Blocking pool configuration, used when no pool is injected.
    pub blocking: BlockingPoolConfig,
}

impl SchedulerConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
        self.blocking.normalize();
    }

    pub(crate) fn default_blocking_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }

    pub(crate) fn sleep_timing(&self) -> SleepTiming {
        SleepTiming {
            margin: self.sleep_margin,
            min_sleep: self.min_sleep,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_safety: ThreadSafety::Concurrent,
            sleep_margin: DEFAULT_SLEEP_MARGIN,
            min_sleep: DEFAULT_MIN_SLEEP,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            blocking: BlockingPoolConfig::default(),
        }
    }
}

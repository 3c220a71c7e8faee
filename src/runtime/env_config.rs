//! Environment variable support for [`SchedulerBuilder`](super::builder::SchedulerBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`min_sleep(..)`)
//! 2. **Environment variables**: values from `COTASK_*` env vars
//! 3. **Defaults**: built-in defaults from [`SchedulerConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `COTASK_THREAD_SAFE` | `bool` | `thread_safety` |
//! | `COTASK_SLEEP_MARGIN_US` | `u64` (µs) | `sleep_margin` |
//! | `COTASK_MIN_SLEEP_US` | `u64` (µs) | `min_sleep` |
//! | `COTASK_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `COTASK_BLOCKING_MIN_THREADS` | `usize` | `blocking.min_threads` |
//! | `COTASK_BLOCKING_MAX_THREADS` | `usize` | `blocking.max_threads` |

use super::config::SchedulerConfig;
use super::job_queue::ThreadSafety;
use std::time::Duration;
use thiserror::Error;

/// Environment variable name for the job queue thread-safety toggle.
pub const ENV_THREAD_SAFE: &str = "COTASK_THREAD_SAFE";
/// Environment variable name for the sleep-worker jitter margin, in microseconds.
pub const ENV_SLEEP_MARGIN_US: &str = "COTASK_SLEEP_MARGIN_US";
/// Environment variable name for the minimum sleep quantum, in microseconds.
pub const ENV_MIN_SLEEP_US: &str = "COTASK_MIN_SLEEP_US";
/// Environment variable name for thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "COTASK_THREAD_NAME_PREFIX";
/// Environment variable name for blocking pool minimum threads.
pub const ENV_BLOCKING_MIN_THREADS: &str = "COTASK_BLOCKING_MIN_THREADS";
/// Environment variable name for blocking pool maximum threads.
pub const ENV_BLOCKING_MAX_THREADS: &str = "COTASK_BLOCKING_MAX_THREADS";

/// Error raised while reading configuration from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable was set to a value that does not parse.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Description of the accepted values.
        expected: &'static str,
        /// The offending value.
        value: String,
    },
}

/// Apply environment variable overrides to a [`SchedulerConfig`].
///
/// Only variables that are set in the environment are applied.
///
/// # Errors
///
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut SchedulerConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_THREAD_SAFE) {
        config.thread_safety = if parse_bool(ENV_THREAD_SAFE, &val)? {
            ThreadSafety::Concurrent
        } else {
            ThreadSafety::SingleProducer
        };
    }
    if let Some(val) = read_env(ENV_SLEEP_MARGIN_US) {
        config.sleep_margin = parse_micros(ENV_SLEEP_MARGIN_US, &val)?;
    }
    if let Some(val) = read_env(ENV_MIN_SLEEP_US) {
        config.min_sleep = parse_micros(ENV_MIN_SLEEP_US, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = read_env(ENV_BLOCKING_MIN_THREADS) {
        config.blocking.min_threads = parse_usize(ENV_BLOCKING_MIN_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_BLOCKING_MAX_THREADS) {
        config.blocking.max_threads = parse_usize(ENV_BLOCKING_MAX_THREADS, &val)?;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidValue {
            var,
            expected: "unsigned integer",
            value: val.to_string(),
        })
}

fn parse_micros(var: &'static str, val: &str) -> Result<Duration, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map(Duration::from_micros)
        .map_err(|_| ConfigError::InvalidValue {
            var,
            expected: "microseconds as u64",
            value: val.to_string(),
        })
}

fn parse_bool(var: &'static str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            expected: "bool (true/false/1/0/yes/no)",
            value: val.to_string(),
        }),
    }
}

// =========================================================================
// Tests
// =========================================================================

//! Scheduler builder.

use super::blocking_pool::{BlockingPool, ThreadPool};
use super::config::SchedulerConfig;
use super::env_config::{apply_env_overrides, ConfigError};
use super::job_queue::ThreadSafety;
use super::scheduler::{SchedulerHandle, TaskScheduler};
use crate::tracing_compat::info;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Builder for constructing a scheduler with custom configuration.
#[derive(Clone, Default)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    pool: Option<Arc<dyn ThreadPool>>,
}

impl SchedulerBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder from the default configuration with `COTASK_*`
    /// environment overrides applied.
    ///
    /// Builder methods called afterwards take precedence over the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparseable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::new();
        apply_env_overrides(&mut builder.config)?;
        Ok(builder)
    }

    /// Create a builder from an explicit configuration.
    #[must_use]
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self { config, pool: None }
    }

    /// Set the job queue's producer model.
    #[must_use]
    pub fn thread_safety(mut self, mode: ThreadSafety) -> Self {
        self.config.thread_safety = mode;
        self
    }

    /// Set the margin added to every sleep-worker wake time.
    #[must_use]
    pub fn sleep_margin(mut self, margin: Duration) -> Self {
        self.config.sleep_margin = margin;
        self
    }

    /// Set the minimum time the sleep worker parks.
    #[must_use]
    pub fn min_sleep(mut self, min_sleep: Duration) -> Self {
        self.config.min_sleep = min_sleep;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Set the blocking pool thread limits.
    #[must_use]
    pub fn blocking_threads(mut self, min: usize, max: usize) -> Self {
        self.config.blocking.min_threads = min;
        self.config.blocking.max_threads = max;
        self
    }

    /// Set how long idle blocking threads above the minimum survive.
    #[must_use]
    pub fn blocking_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.blocking.idle_timeout = timeout;
        self
    }

    /// Use `pool` for [`run_in_thread`](SchedulerHandle::run_in_thread)
    /// instead of a dedicated [`BlockingPool`].
    #[must_use]
    pub fn thread_pool(mut self, pool: Arc<dyn ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Returns the configuration built so far.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Build the scheduler.
    ///
    /// Worker threads are not spawned until the first sleep or wait is queued.
    #[must_use]
    pub fn build(self) -> TaskScheduler {
        let mut config = self.config;
        config.normalize();
        let pool = self.pool.unwrap_or_else(|| {
            Arc::new(BlockingPool::new(
                &config.blocking,
                &config.thread_name_prefix,
            ))
        });
        info!(
            thread_safety = ?config.thread_safety,
            prefix = %config.thread_name_prefix,
            min_sleep_us = config.min_sleep.as_micros() as u64,
            "building scheduler"
        );
        TaskScheduler::from_handle(SchedulerHandle::new(config, pool))
    }
}

impl fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("config", &self.config)
            .field("custom_pool", &self.pool.is_some())
            .finish()
    }
}

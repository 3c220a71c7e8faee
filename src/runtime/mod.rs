//! Scheduler and background workers.
//!
//! This module contains the scheduling machinery:
//!
//! - [`config`]: Scheduler configuration types
//! - [`builder`]: Scheduler builder
//! - [`env_config`]: `COTASK_*` environment overrides
//! - [`scheduler`]: The stepped scheduler and its handle
//! - [`job_queue`]: FIFO queue of work items drained once per tick
//! - [`blocking_pool`]: Thread pools for offloaded blocking work
//! - `timer`: Sleep worker and its deadline heap
//! - `wait`: Wait worker for [`WaitHandle`](crate::sync::WaitHandle)s
//!
//! # Host Loop
//!
//! The scheduler never runs on its own. A host steps it and idles while
//! nothing is queued:
//!
//! ```ignore
//! use cotask::runtime::SchedulerBuilder;
//! use std::time::Duration;
//!
//! let scheduler = SchedulerBuilder::new().build();
//! let result = scheduler.start_coroutine(my_task());
//! while result.is_pending() {
//!     scheduler.step()?;
//!     if !scheduler.has_pending_tasks() {
//!         scheduler.wait_for_work_items(Duration::from_millis(16));
//!     }
//! }
//! ```

pub mod blocking_pool;
pub mod builder;
pub mod config;
pub mod env_config;
pub mod job_queue;
pub mod scheduler;
mod timer;
mod wait;
mod worker;

pub use blocking_pool::{BlockingPool, InlinePool, Job, ThreadPool};
pub use builder::SchedulerBuilder;
pub use config::{BlockingPoolConfig, SchedulerConfig};
pub use env_config::ConfigError;
pub use job_queue::{JobQueue, ThreadSafety, WorkItem};
pub use scheduler::{Schedulable, SchedulerHandle, TaskExecutionPolicy, TaskScheduler};

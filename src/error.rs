//! Error types and error handling strategy for cotask.
//!
//! Every failure that crosses a [`Future`](crate::Future) is an [`Error`].
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Errors are cheap to clone, because one failure may be delivered to
//!   many continuations
//! - Cancellation (disposal) is not an error; a disposed future never fails
//!
//! # Error Categories
//!
//! - **Task**: failures raised by task logic, panics, and unhandled
//!   background failures
//! - **Protocol**: a coroutine yielded something the driver cannot interpret
//! - **Future**: illegal state transitions on a future
//! - **Runtime**: the scheduler or one of its worker threads is unavailable
//! - **Internal**: runtime bugs and invalid states

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Task ===
    /// Failure raised by task logic or by work handed to a thread pool.
    User,
    /// Work running on a thread pool panicked.
    Panicked,
    /// A task started as a background task failed and nobody observed it.
    BackgroundTaskFailed,

    // === Protocol ===
    /// A coroutine yielded a value that is not a recognized suspension intent.
    UnsupportedYield,

    // === Future ===
    /// `complete` or `fail` was called on a future that already settled.
    AlreadySettled,
    /// `complete` or `fail` was called on a disposed future.
    FutureDisposed,

    // === Runtime ===
    /// The scheduler has been disposed.
    SchedulerDisposed,
    /// A background worker thread could not be spawned.
    WorkerSpawnFailed,

    // === Internal ===
    /// Internal runtime error (bug).
    Internal,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::User | Self::Panicked | Self::BackgroundTaskFailed => ErrorCategory::Task,
            Self::UnsupportedYield => ErrorCategory::Protocol,
            Self::AlreadySettled | Self::FutureDisposed => ErrorCategory::Future,
            Self::SchedulerDisposed | Self::WorkerSpawnFailed => ErrorCategory::Runtime,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Returns true if this kind signals a programming mistake rather than
    /// a runtime condition.
    #[must_use]
    pub const fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedYield | Self::AlreadySettled | Self::FutureDisposed
        )
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Task-originated failures.
    Task,
    /// Coroutine protocol violations.
    Protocol,
    /// Future lifecycle violations.
    Future,
    /// Scheduler and worker availability.
    Runtime,
    /// Internal runtime errors.
    Internal,
}

/// The main error type for cotask operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Wraps an arbitrary error raised by task logic.
    #[must_use]
    pub fn user(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        let message = source.to_string();
        Self::new(ErrorKind::User)
            .with_message(message)
            .with_source(source)
    }

    /// Creates a task failure from a plain message.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(message)
    }

    /// Creates a panic error from a caught panic message.
    #[must_use]
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Panicked).with_message(message)
    }

    /// Wraps the failure of an unobserved background task.
    #[must_use]
    pub fn background_task_failed(cause: Self) -> Self {
        Self::new(ErrorKind::BackgroundTaskFailed)
            .with_message("unhandled failure in background task")
            .with_source(cause)
    }

    /// Creates the protocol-misuse error for an uninterpretable yield.
    #[must_use]
    pub fn unsupported_yield(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedYield).with_message(detail)
    }

    /// Creates a scheduler-disposed error.
    #[must_use]
    pub fn scheduler_disposed() -> Self {
        Self::new(ErrorKind::SchedulerDisposed)
    }

    /// Creates an internal error (runtime bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }

    /// Returns the wrapped cause of a background-task failure, if this is one.
    #[must_use]
    pub fn background_cause(&self) -> Option<&Self> {
        if self.kind != ErrorKind::BackgroundTaskFailed {
            return None;
        }
        self.source.as_ref().and_then(|s| s.downcast_ref::<Self>())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::user(e)
    }
}

/// A specialized Result type for cotask operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;

//! Error types - lifecycle misuse and bad arguments
//!
//! Non-zero exit codes are not errors here; they are returned as data.

use thiserror::Error;

/// Misuse of the scheduler's start/stop lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("attempted to start an already-running scheduler")]
    AlreadyStarted,
    #[error("scheduler is not running")]
    NotStarted,
    #[error("scheduler is still draining from a previous stop")]
    StillStopping,
}

/// Errors surfaced by the scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("config error: {0}")]
    Config(String),
}

impl SchedulerError {
    /// Whether this is a lifecycle error
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Lifecycle(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SchedulerError>;

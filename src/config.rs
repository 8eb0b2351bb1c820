//! Scheduler configuration - concurrency cap and exit detection

use crate::error::{Result, SchedulerError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default upper bound on concurrently running processes
pub const DEFAULT_MAX_CONCURRENCY: usize = 25;

/// Default watcher cadence when polling for exits
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How the completion watcher learns that a process exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDetection {
    /// Await the OS exit notification for each process
    Notify,
    /// Check every running process on a fixed cadence
    Poll(Duration),
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of processes running at once
    pub max_concurrency: usize,
    /// Poll cadence in milliseconds; `None` uses native exit notification
    pub poll_interval_ms: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            poll_interval_ms: None,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Detect exits by polling at `interval` instead of awaiting them.
    ///
    /// The interval is kept in whole milliseconds, rounded up.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        let ms = interval.as_nanos().div_ceil(1_000_000);
        self.poll_interval_ms = Some(u64::try_from(ms).unwrap_or(u64::MAX));
        self
    }

    /// Poll at [`DEFAULT_POLL_INTERVAL`]
    pub fn with_polling(self) -> Self {
        self.with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    pub fn exit_detection(&self) -> ExitDetection {
        match self.poll_interval_ms {
            Some(ms) => ExitDetection::Poll(Duration::from_millis(ms)),
            None => ExitDetection::Notify,
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(SchedulerError::InvalidArgument(
                "max_concurrency must be greater than 0".into(),
            ));
        }
        if self.poll_interval_ms == Some(0) {
            return Err(SchedulerError::InvalidArgument(
                "poll_interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        let config: SchedulerConfig = serde_yaml::from_str(input)
            .map_err(|e| SchedulerError::Config(format!("parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SchedulerError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&content)
    }
}

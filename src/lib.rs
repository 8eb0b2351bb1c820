//! Shellpool - bounded-concurrency runtime for shell commands
//!
//! Spawn batches of shell commands from async code, run at most N at a
//! time, observe each one through a [`ProcessHandle`], and read their
//! output as one merged stream of lines.
//!
//! ```no_run
//! use futures::StreamExt;
//! use shellpool::{Scheduler, SchedulerConfig, SchedulerError, StreamSelector};
//!
//! # async fn demo() -> Result<(), SchedulerError> {
//! Scheduler::scoped(SchedulerConfig::new().with_max_concurrency(2), |s| async move {
//!     let mut lines = s.iter_lines(["echo one", "echo two"], StreamSelector::Stdout)?;
//!     while let Some(line) = lines.next().await {
//!         println!("{}", line);
//!     }
//!     let codes = s.gather(["true", "false"]).await?;
//!     assert_eq!(codes, vec![0, 1]);
//!     Ok::<_, SchedulerError>(())
//! })
//! .await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod report;

// Re-exports
pub use crate::config::{ExitDetection, SchedulerConfig};
pub use crate::core::{
    merge, Launcher, Lifecycle, ProcessHandle, ProcessState, Scheduler, ShellLauncher,
    StreamSelector,
};
pub use crate::error::{LifecycleError, Result, SchedulerError};
pub use crate::report::ProcessReport;

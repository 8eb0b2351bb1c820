//! Core engine - admission control, process handles, output merging

mod launcher;
mod merge;
mod process;
mod scheduler;
mod signal;
mod watcher;

pub use launcher::{exit_code, ExitStatusSource, LaunchedProcess, Launcher, OutputPipe, ShellLauncher};
pub use merge::merge;
pub use process::{ProcessHandle, ProcessState};
pub use scheduler::{Lifecycle, Scheduler, StreamSelector, LAUNCH_FAILURE_EXIT_CODE};
pub use signal::OneShot;
pub use watcher::UNKNOWN_EXIT_CODE;

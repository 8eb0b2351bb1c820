//! Process Scheduler - bounded-concurrency runtime for shell commands
//!
//! Every spawned command becomes a [`ProcessHandle`] that waits on the
//! admission gate before it is launched, so no more than
//! `max_concurrency` processes run at once. The gate permit is held in
//! the running table and released when the handle is completed.

use super::launcher::{Launcher, ShellLauncher};
use super::merge::merge;
use super::process::ProcessHandle;
use super::watcher::{self, ExitNotice, UNKNOWN_EXIT_CODE};
use crate::config::{ExitDetection, SchedulerConfig};
use crate::error::{LifecycleError, Result, SchedulerError};
use futures::future::{self, join_all};
use futures::stream::{BoxStream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::io;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Exit code recorded for a command that could not be launched
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = 127;

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Idle,
    Started,
    Stopped,
}

/// Which output streams `iter_lines` reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamSelector {
    Stdout,
    Stderr,
    #[default]
    Both,
}

impl FromStr for StreamSelector {
    type Err = SchedulerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            "both" => Ok(Self::Both),
            other => Err(SchedulerError::InvalidArgument(format!(
                "unknown stream `{}` (expected stdout, stderr or both)",
                other
            ))),
        }
    }
}

impl fmt::Display for StreamSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
            Self::Both => write!(f, "both"),
        }
    }
}

/// A running handle together with the gate permit it holds
struct Admitted {
    handle: ProcessHandle,
    _permit: OwnedSemaphorePermit,
}

#[derive(Default)]
struct Tables {
    lifecycle: Lifecycle,
    pending: HashMap<Uuid, ProcessHandle>,
    running: HashMap<Uuid, Admitted>,
    notices: Option<mpsc::UnboundedSender<ExitNotice>>,
    watcher: Option<JoinHandle<()>>,
}

/// State shared between the scheduler, admission tasks and the watcher
pub(crate) struct Shared {
    config: SchedulerConfig,
    gate: Arc<Semaphore>,
    launcher: Box<dyn Launcher>,
    tables: Mutex<Tables>,
    outstanding: watch::Sender<usize>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_outstanding(&self, tables: &Tables) {
        self.outstanding
            .send_replace(tables.pending.len() + tables.running.len());
    }

    /// Done-transition: record the exit, leave the running table, free the slot
    pub(crate) fn finish(&self, id: Uuid, exit_code: i32) {
        let mut tables = self.lock();
        let Some(admitted) = tables.running.remove(&id) else {
            log::debug!("Ignoring duplicate completion for {}", id);
            return;
        };

        admitted.handle.mark_done(exit_code);
        log::info!(
            "Process {} finished (exit: {}): {}",
            id,
            exit_code,
            admitted.handle.command()
        );
        drop(admitted);

        self.publish_outstanding(&tables);
    }

    /// Check every running process once
    pub(crate) fn poll_running(&self) {
        let running: Vec<ProcessHandle> = self
            .lock()
            .running
            .values()
            .map(|admitted| admitted.handle.clone())
            .collect();

        for handle in running {
            match handle.try_exit() {
                Ok(Some(exit_code)) => self.finish(handle.id(), exit_code),
                Ok(None) => {}
                Err(e) => {
                    log::warn!("Failed to poll process {}: {}", handle.id(), e);
                    self.finish(handle.id(), UNKNOWN_EXIT_CODE);
                }
            }
        }
    }
}

/// Admission sequence for one handle: gate, launch, then running
async fn admit(shared: Arc<Shared>, handle: ProcessHandle) {
    let permit = match shared.gate.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            log::error!("Admission gate closed for {}: {}", handle.id(), e);
            return;
        }
    };

    // Launch under the table lock so a snapshot never shows a launched
    // process as pending
    let mut tables = shared.lock();
    let launched = shared.launcher.launch(handle.command());
    tables.pending.remove(&handle.id());

    match launched {
        Ok(process) => {
            tables.running.insert(
                handle.id(),
                Admitted {
                    handle: handle.clone(),
                    _permit: permit,
                },
            );
            handle.mark_running(process);
            log::info!("Started process {}: {}", handle.id(), handle.command());

            if shared.config.exit_detection() == ExitDetection::Notify {
                match (handle.take_exit(), tables.notices.clone()) {
                    (Some(exit), Some(notices)) => watcher::watch_exit(handle.id(), exit, notices),
                    _ => log::error!("No completion watcher for process {}", handle.id()),
                }
            }
        }
        Err(e) => {
            // The slot was never used; hand it back before completing
            drop(permit);
            log::warn!("Failed to launch `{}`: {}", handle.command(), e);
            handle.mark_launch_failed(LAUNCH_FAILURE_EXIT_CODE);
        }
    }

    shared.publish_outstanding(&tables);
}

type Chunks = BoxStream<'static, io::Result<Vec<u8>>>;

/// Chunks that `iter_lines` yields
fn keep(chunks: Chunks) -> BoxStream<'static, Option<io::Result<Vec<u8>>>> {
    chunks.map(Some).boxed()
}

/// Chunks that are read to keep the pipe flowing, then dropped
fn discard(chunks: Chunks) -> BoxStream<'static, Option<io::Result<Vec<u8>>>> {
    chunks.map(|_| None).boxed()
}

fn decode_line(chunk: &[u8]) -> String {
    String::from_utf8_lossy(chunk).trim_end().to_string()
}

/// Bounded-concurrency process runtime
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a scheduler that runs commands through the platform shell
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        Self::with_launcher(config, ShellLauncher)
    }

    /// Create a scheduler with a custom process launcher
    pub fn with_launcher(config: SchedulerConfig, launcher: impl Launcher) -> Result<Self> {
        config.validate()?;
        let (outstanding, _) = watch::channel(0);

        Ok(Self {
            shared: Arc::new(Shared {
                gate: Arc::new(Semaphore::new(config.max_concurrency)),
                config,
                launcher: Box::new(launcher),
                tables: Mutex::new(Tables::default()),
                outstanding,
            }),
        })
    }

    /// Start a scheduler, run `body`, then stop it on every exit path
    pub async fn scoped<F, Fut, T, E>(config: SchedulerConfig, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Scheduler) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<SchedulerError>,
    {
        let scheduler = Scheduler::new(config)?;
        scheduler.start()?;

        let outcome = body(scheduler.clone()).await;
        let stopped = scheduler.stop().await;

        let value = outcome?;
        stopped?;
        Ok(value)
    }

    /// Begin accepting commands and start the completion watcher
    pub fn start(&self) -> Result<()> {
        let mut tables = self.shared.lock();
        if tables.lifecycle == Lifecycle::Started {
            return Err(LifecycleError::AlreadyStarted.into());
        }
        if tables.watcher.is_some() {
            return Err(LifecycleError::StillStopping.into());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let detection = self.shared.config.exit_detection();
        tables.notices = Some(tx);
        tables.watcher = Some(tokio::spawn(watcher::run(
            Arc::downgrade(&self.shared),
            rx,
            detection,
        )));
        tables.lifecycle = Lifecycle::Started;

        log::info!(
            "Scheduler started (max concurrency: {}, exit detection: {:?})",
            self.shared.config.max_concurrency,
            detection
        );
        Ok(())
    }

    /// Stop accepting commands, wait for outstanding work, then stop the watcher
    pub async fn stop(&self) -> Result<()> {
        {
            let mut tables = self.shared.lock();
            if tables.lifecycle != Lifecycle::Started {
                return Err(LifecycleError::NotStarted.into());
            }
            tables.lifecycle = Lifecycle::Stopped;
            log::info!(
                "Stopping scheduler ({} pending, {} running)",
                tables.pending.len(),
                tables.running.len()
            );
        }

        self.block().await;

        let watcher = {
            let mut tables = self.shared.lock();
            tables.notices = None;
            tables.watcher.take()
        };
        if let Some(watcher) = watcher {
            if let Err(e) = watcher.await {
                log::warn!("Completion watcher ended abnormally: {}", e);
            }
        }

        log::info!("Scheduler stopped");
        Ok(())
    }

    /// Schedule commands; returns one handle per command, in input order.
    ///
    /// Does not wait for any command to start. Handles beyond the
    /// concurrency cap stay pending until a slot frees up.
    pub fn spawn<I, S>(&self, commands: I) -> Result<Vec<ProcessHandle>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let handles: Vec<ProcessHandle> = {
            let mut tables = self.shared.lock();
            if tables.lifecycle != Lifecycle::Started {
                return Err(LifecycleError::NotStarted.into());
            }

            let handles: Vec<ProcessHandle> = commands
                .into_iter()
                .map(|command| ProcessHandle::new(command.as_ref()))
                .collect();
            for handle in &handles {
                tables.pending.insert(handle.id(), handle.clone());
            }
            self.shared.publish_outstanding(&tables);
            handles
        };

        log::debug!("Scheduled {} command(s)", handles.len());
        for handle in &handles {
            tokio::spawn(admit(self.shared.clone(), handle.clone()));
        }

        Ok(handles)
    }

    /// Spawn commands and stream their output as decoded lines.
    ///
    /// Lines from different commands interleave in arrival order.
    pub fn iter_lines<I, S>(
        &self,
        commands: I,
        selector: StreamSelector,
    ) -> Result<BoxStream<'static, String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let handles = self.spawn(commands)?;

        let stdouts = || merge(handles.iter().map(ProcessHandle::stdout_chunks)).boxed();
        let stderrs = || merge(handles.iter().map(ProcessHandle::stderr_chunks)).boxed();
        // The unselected pipe is still read, or a chatty process blocks on it
        let chunks = match selector {
            StreamSelector::Stdout => merge(vec![keep(stdouts()), discard(stderrs())]),
            StreamSelector::Stderr => merge(vec![discard(stdouts()), keep(stderrs())]),
            StreamSelector::Both => merge(vec![keep(stdouts()), keep(stderrs())]),
        };

        Ok(chunks
            .filter_map(|chunk| {
                future::ready(match chunk {
                    Some(Ok(chunk)) => Some(decode_line(&chunk)),
                    Some(Err(e)) => {
                        log::warn!("Output stream read error: {}", e);
                        None
                    }
                    None => None,
                })
            })
            .boxed())
    }

    /// Spawn commands and stream their stdout lines
    pub fn stdout_lines<I, S>(&self, commands: I) -> Result<BoxStream<'static, String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.iter_lines(commands, StreamSelector::Stdout)
    }

    /// Spawn commands and stream their stderr lines
    pub fn stderr_lines<I, S>(&self, commands: I) -> Result<BoxStream<'static, String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.iter_lines(commands, StreamSelector::Stderr)
    }

    /// Spawn commands and wait for all of them; exit codes follow input order
    pub async fn gather<I, S>(&self, commands: I) -> Result<Vec<i32>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let handles = self.spawn(commands)?;

        Ok(join_all(handles.iter().map(|handle| handle.drain())).await)
    }

    /// Wait until no command is pending or running
    pub async fn block(&self) {
        let mut outstanding = self.shared.outstanding.subscribe();
        // The sender lives in `self.shared`, so this cannot observe a close
        let _ = outstanding.wait_for(|count| *count == 0).await;
    }

    /// Snapshot of handles currently running
    pub fn running_handles(&self) -> HashSet<ProcessHandle> {
        self.shared
            .lock()
            .running
            .values()
            .map(|admitted| admitted.handle.clone())
            .collect()
    }

    /// Snapshot of handles waiting for a slot
    pub fn pending_handles(&self) -> HashSet<ProcessHandle> {
        self.shared.lock().pending.values().cloned().collect()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lock().lifecycle
    }

    pub fn is_started(&self) -> bool {
        self.lifecycle() == Lifecycle::Started
    }

    pub fn max_concurrency(&self) -> usize {
        self.shared.config.max_concurrency
    }

    /// Poll cadence, if exits are detected by polling
    pub fn poll_interval(&self) -> Option<Duration> {
        match self.shared.config.exit_detection() {
            ExitDetection::Poll(interval) => Some(interval),
            ExitDetection::Notify => None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }
}

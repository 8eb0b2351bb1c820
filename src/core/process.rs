//! Process handle - lifecycle of one scheduled shell command
//!
//! A handle moves Pending -> Running -> Done exactly once per step. Both
//! steps are one-shot signals, so any number of tasks can await them and
//! the state read from them is always consistent.

use super::launcher::{ExitStatusSource, LaunchedProcess, OutputPipe};
use super::merge::merge;
use super::signal::OneShot;
use crate::report::ProcessReport;
use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

/// Lifecycle state of a process handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Pending,
    Running,
    Done,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
        }
    }
}

#[derive(Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

/// OS resources of a launched process, taken by whoever consumes them
#[derive(Default)]
struct Resources {
    stdout: Option<OutputPipe>,
    stderr: Option<OutputPipe>,
    exit: Option<Box<dyn ExitStatusSource>>,
}

struct HandleInner {
    id: Uuid,
    command: String,
    scheduled_at: DateTime<Utc>,
    began: OneShot<DateTime<Utc>>,
    done: OneShot<i32>,
    resources: Mutex<Resources>,
}

/// Handle to one scheduled shell command
#[derive(Clone)]
pub struct ProcessHandle {
    inner: Arc<HandleInner>,
}

impl ProcessHandle {
    pub(crate) fn new(command: &str) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: Uuid::new_v4(),
                command: command.to_string(),
                scheduled_at: Utc::now(),
                began: OneShot::new(),
                done: OneShot::new(),
                resources: Mutex::new(Resources::default()),
            }),
        }
    }

    /// Unique identity; identical commands get distinct ids
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn command(&self) -> &str {
        &self.inner.command
    }

    /// When the handle was created
    pub fn scheduled_at(&self) -> DateTime<Utc> {
        self.inner.scheduled_at
    }

    /// When the process started; `None` while pending
    pub fn began_at(&self) -> Option<DateTime<Utc>> {
        self.inner.began.get()
    }

    /// Exit code; `None` until done
    pub fn exit_code(&self) -> Option<i32> {
        self.inner.done.get()
    }

    pub fn state(&self) -> ProcessState {
        if self.inner.done.is_set() {
            ProcessState::Done
        } else if self.inner.began.is_set() {
            ProcessState::Running
        } else {
            ProcessState::Pending
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == ProcessState::Pending
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    pub fn is_done(&self) -> bool {
        self.state() == ProcessState::Done
    }

    /// Wait until the process has started
    pub async fn wait_running(&self) {
        self.inner.began.wait().await;
    }

    /// Wait until the process has finished and return its exit code
    pub async fn wait_done(&self) -> i32 {
        self.inner.done.wait().await
    }

    /// Discard any unread output, then wait for the exit code.
    ///
    /// A process blocked on a full pipe never exits, so callers that do not
    /// want the output should use this rather than [`ProcessHandle::wait_done`].
    pub async fn drain(&self) -> i32 {
        merge(vec![self.stdout_chunks(), self.stderr_chunks()])
            .for_each(|_| future::ready(()))
            .await;
        self.wait_done().await
    }

    /// Raw stdout chunks, one per line with the terminator kept.
    ///
    /// Waits for the process to start first. The pipe can be consumed once;
    /// later calls yield an empty stream.
    pub fn stdout_chunks(&self) -> BoxStream<'static, io::Result<Vec<u8>>> {
        self.pipe_chunks(Pipe::Stdout)
    }

    /// Raw stderr chunks; see [`ProcessHandle::stdout_chunks`]
    pub fn stderr_chunks(&self) -> BoxStream<'static, io::Result<Vec<u8>>> {
        self.pipe_chunks(Pipe::Stderr)
    }

    /// Serializable snapshot of this handle
    pub fn report(&self) -> ProcessReport {
        ProcessReport {
            id: self.id(),
            command: self.command().to_string(),
            state: self.state(),
            scheduled_at: self.scheduled_at(),
            began_at: self.began_at(),
            exit_code: self.exit_code(),
        }
    }

    /// Record a successful launch and signal "began running"
    pub(crate) fn mark_running(&self, process: LaunchedProcess) -> bool {
        {
            let mut resources = self.resources();
            resources.stdout = Some(process.stdout);
            resources.stderr = Some(process.stderr);
            resources.exit = Some(process.exit);
        }
        self.inner.began.set(Utc::now())
    }

    /// Record a launch that never produced a process
    pub(crate) fn mark_launch_failed(&self, exit_code: i32) {
        self.inner.began.set(Utc::now());
        self.mark_done(exit_code);
    }

    /// Record the exit code and signal "done running". No-op if already done.
    pub(crate) fn mark_done(&self, exit_code: i32) -> bool {
        let fired = self.inner.done.set(exit_code);
        if fired {
            self.resources().exit = None;
        }
        fired
    }

    /// Take the exit source so a dedicated task can await it
    pub(crate) fn take_exit(&self) -> Option<Box<dyn ExitStatusSource>> {
        self.resources().exit.take()
    }

    /// Non-blocking exit check used by the polling watcher
    pub(crate) fn try_exit(&self) -> io::Result<Option<i32>> {
        match self.resources().exit.as_mut() {
            Some(exit) => exit.try_wait(),
            None => Ok(None),
        }
    }

    fn resources(&self) -> MutexGuard<'_, Resources> {
        self.inner
            .resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn take_pipe(&self, pipe: Pipe) -> Option<OutputPipe> {
        let mut resources = self.resources();
        match pipe {
            Pipe::Stdout => resources.stdout.take(),
            Pipe::Stderr => resources.stderr.take(),
        }
    }

    fn pipe_chunks(&self, pipe: Pipe) -> BoxStream<'static, io::Result<Vec<u8>>> {
        let handle = self.clone();
        stream::once(async move {
            handle.wait_running().await;
            handle.take_pipe(pipe)
        })
        .flat_map(|reader| match reader {
            Some(reader) => read_chunks(reader).boxed(),
            None => stream::empty().boxed(),
        })
        .boxed()
    }
}

/// Read newline-delimited chunks until EOF or the first error
fn read_chunks(reader: OutputPipe) -> impl futures::Stream<Item = io::Result<Vec<u8>>> + Send {
    stream::unfold(Some(BufReader::new(reader)), |state| async move {
        let mut reader = state?;
        let mut chunk = Vec::new();
        match reader.read_until(b'\n', &mut chunk).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(chunk), Some(reader))),
            Err(e) => Some((Err(e), None)),
        }
    })
}

impl PartialEq for ProcessHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ProcessHandle {}

impl Hash for ProcessHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> `{}`", self.inner.scheduled_at, self.inner.command)
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.inner.id)
            .field("command", &self.inner.command)
            .field("state", &self.state())
            .field("exit_code", &self.exit_code())
            .finish()
    }
}

//! Process launcher - start a shell command with piped output

use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};

/// A readable output pipe of a launched process
pub type OutputPipe = Pin<Box<dyn AsyncRead + Send>>;

/// Observes a launched process's exit
#[async_trait]
pub trait ExitStatusSource: Send {
    /// Wait for the process to exit and return its exit code
    async fn wait(&mut self) -> io::Result<i32>;

    /// Exit code if the process already exited, without blocking
    fn try_wait(&mut self) -> io::Result<Option<i32>>;
}

/// A process that has been started
pub struct LaunchedProcess {
    pub stdout: OutputPipe,
    pub stderr: OutputPipe,
    pub exit: Box<dyn ExitStatusSource>,
}

/// Starts external commands on behalf of the scheduler
pub trait Launcher: Send + Sync + 'static {
    fn launch(&self, command: &str) -> io::Result<LaunchedProcess>;
}

/// Runs commands through the platform shell
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellLauncher;

impl ShellLauncher {
    fn command(command: &str) -> Command {
        #[cfg(windows)]
        {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        }
        #[cfg(not(windows))]
        {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }
}

impl Launcher for ShellLauncher {
    fn launch(&self, command: &str) -> io::Result<LaunchedProcess> {
        log::debug!("Launching shell command: {}", command);

        let mut child = Self::command(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stderr not captured"))?;

        Ok(LaunchedProcess {
            stdout: Box::pin(stdout),
            stderr: Box::pin(stderr),
            exit: Box::new(child),
        })
    }
}

#[async_trait]
impl ExitStatusSource for Child {
    async fn wait(&mut self) -> io::Result<i32> {
        let status = Child::wait(self).await?;
        Ok(exit_code(status))
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(Child::try_wait(self)?.map(exit_code))
    }
}

/// Verbatim exit code; signal-terminated processes report `-signal`
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    -1
}

//! Child process launching.
//!
//! [`ProcessLauncher`] is the seam between the pool and the operating
//! system. The shipping implementation, [`CommandLauncher`], starts the
//! worker with `tokio::process` and forwards every stdout/stderr line to a
//! callback from a background task, so the caller never blocks on child
//! output. Tests substitute an in-process launcher (see `crate::testing`).

use crate::error::{Result, SpawnerError};
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Receives one line of child output (without the trailing newline).
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Program plus arguments for a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Split `[program, args...]`; `None` when `parts` is empty.
    pub fn from_parts(parts: &[String]) -> Option<Self> {
        let (program, args) = parts.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    /// Append one argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// A running (or exited) worker process owned by exactly one handle.
#[async_trait]
pub trait WorkerProcess: Send + Sync + fmt::Debug {
    /// OS process id, if still known.
    fn id(&self) -> Option<u32>;

    /// Non-blocking liveness poll.
    fn is_alive(&mut self) -> bool;

    /// Ask the process to exit (SIGTERM). A no-op once it has exited.
    fn terminate(&mut self) -> io::Result<()>;

    /// Force the process to exit (SIGKILL). A no-op once it has exited.
    fn kill(&mut self) -> io::Result<()>;

    /// Wait for exit and return the exit code (`None` when killed by a
    /// signal). Only call after [`Self::terminate`] or once exited.
    async fn wait(&mut self) -> io::Result<Option<i32>>;
}

/// Starts worker processes.
pub trait ProcessLauncher: Send + Sync + fmt::Debug {
    /// Start `command`, delivering its output lines to the callbacks.
    ///
    /// # Errors
    ///
    /// [`SpawnerError::Launch`] when the executable cannot be started.
    fn launch(
        &self,
        command: &CommandLine,
        on_stdout: LineCallback,
        on_stderr: LineCallback,
    ) -> Result<Box<dyn WorkerProcess>>;
}

/// Launcher backed by real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandLauncher;

impl ProcessLauncher for CommandLauncher {
    fn launch(
        &self,
        command: &CommandLine,
        on_stdout: LineCallback,
        on_stderr: LineCallback,
    ) -> Result<Box<dyn WorkerProcess>> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| SpawnerError::Launch {
            command: command.to_string(),
            source,
        })?;

        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, on_stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, on_stderr);
        }

        debug!("Launched pid {:?}: {command}", child.id());
        Ok(Box::new(ChildProcess { child }))
    }
}

fn forward_lines<R>(reader: R, callback: LineCallback)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => callback(&line),
                Ok(None) => break,
                Err(e) => {
                    debug!("Stopped reading child output: {e}");
                    break;
                }
            }
        }
    });
}

/// [`WorkerProcess`] over a `tokio::process::Child`.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                warn!("Could not poll child {:?}: {e}", self.child.id());
                false
            }
        }
    }

    fn terminate(&mut self) -> io::Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        match self.child.id() {
            Some(pid) => send_sigterm(pid),
            None => self.child.start_kill(),
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        self.child.start_kill()
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> io::Result<()> {
    // SAFETY: kill() only signals the given pid; it touches no memory.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Exited between the liveness poll and the signal.
        return Ok(());
    }
    Err(err)
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "signals are only available on Unix",
    ))
}

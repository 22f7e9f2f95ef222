//! In-process test doubles for the process launcher.
//!
//! [`InProcessLauncher`] "launches" a worker by spawning a tokio task that
//! binds the worker socket and answers self-tests, so pool behaviour can be
//! exercised without building or forking real binaries. Each launch can be
//! scripted with an [`EchoBehavior`], and any worker can be killed from the
//! outside to simulate a crash.

use crate::error::{Result, SpawnerError};
use crate::launcher::{CommandLine, LineCallback, ProcessLauncher, WorkerProcess};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::{AbortHandle, JoinHandle};
use worker_spawner_core::MessageTag;
use worker_spawner_core::framing::{read_string_async, read_tag_async, write_string_async};

/// How a fake worker behaves once launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EchoBehavior {
    /// Bind the socket and echo self-test payloads.
    #[default]
    Healthy,
    /// Bind the socket but answer self-tests with the wrong payload.
    WrongAnswer,
    /// Accept connections but never reply.
    Unresponsive,
    /// Never create the socket file.
    NeverListen,
}

#[derive(Debug, Default)]
struct LauncherState {
    scripted: VecDeque<EchoBehavior>,
    launched: Vec<PathBuf>,
    running: HashMap<PathBuf, AbortHandle>,
    fail_launches: bool,
}

/// Launcher whose workers are tokio tasks inside the test process.
///
/// Cloning shares state, so a test can keep a clone after handing one to
/// the pool.
#[derive(Debug, Clone, Default)]
pub struct InProcessLauncher {
    state: Arc<Mutex<LauncherState>>,
}

impl InProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue behaviours for the next launches; later launches are healthy.
    pub fn script(&self, behaviors: impl IntoIterator<Item = EchoBehavior>) {
        self.lock().scripted.extend(behaviors);
    }

    /// Make every following launch fail as if the executable were missing.
    pub fn fail_launches(&self, fail: bool) {
        self.lock().fail_launches = fail;
    }

    /// Socket paths of every worker launched so far, in order.
    pub fn launched(&self) -> Vec<PathBuf> {
        self.lock().launched.clone()
    }

    /// Simulate a crash of the worker listening on `socket_path`.
    ///
    /// The socket file is left behind, as it would be by a real crash.
    pub fn kill(&self, socket_path: &Path) {
        if let Some(handle) = self.lock().running.remove(socket_path) {
            handle.abort();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LauncherState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ProcessLauncher for InProcessLauncher {
    fn launch(
        &self,
        command: &CommandLine,
        on_stdout: LineCallback,
        _on_stderr: LineCallback,
    ) -> Result<Box<dyn WorkerProcess>> {
        let mut state = self.lock();
        if state.fail_launches {
            return Err(SpawnerError::Launch {
                command: command.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "scripted launch failure"),
            });
        }

        let socket_path = command
            .args
            .last()
            .map(PathBuf::from)
            .ok_or_else(|| SpawnerError::Launch {
                command: command.to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "no socket path argument"),
            })?;
        let behavior = state.scripted.pop_front().unwrap_or_default();

        let task = tokio::spawn(run_echo_worker(socket_path.clone(), behavior, on_stdout));
        state.launched.push(socket_path.clone());
        state.running.insert(socket_path, task.abort_handle());

        Ok(Box::new(InProcessWorker { task: Some(task) }))
    }
}

/// [`WorkerProcess`] backed by a tokio task.
#[derive(Debug)]
pub struct InProcessWorker {
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl WorkerProcess for InProcessWorker {
    fn id(&self) -> Option<u32> {
        None
    }

    fn is_alive(&mut self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn terminate(&mut self) -> io::Result<()> {
        if let Some(task) = &self.task {
            task.abort();
        }
        Ok(())
    }

    fn kill(&mut self) -> io::Result<()> {
        self.terminate()
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        match self.task.take() {
            Some(task) => match task.await {
                Ok(()) => Ok(Some(0)),
                Err(e) if e.is_cancelled() => Ok(None),
                Err(e) => Err(io::Error::other(e.to_string())),
            },
            None => Ok(None),
        }
    }
}

async fn run_echo_worker(socket_path: PathBuf, behavior: EchoBehavior, on_stdout: LineCallback) {
    if behavior == EchoBehavior::NeverListen {
        std::future::pending::<()>().await;
        return;
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(e) => {
            on_stdout(&format!("bind failed: {e}"));
            return;
        }
    };
    on_stdout(&format!("listening on {}", socket_path.display()));

    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        tokio::spawn(answer(stream, behavior));
    }
}

async fn answer(mut stream: UnixStream, behavior: EchoBehavior) {
    let Ok(MessageTag::SelfTest) = read_tag_async(&mut stream).await else {
        return;
    };
    let Ok(payload) = read_string_async(&mut stream).await else {
        return;
    };
    match behavior {
        EchoBehavior::WrongAnswer => {
            let _ = write_string_async(&mut stream, "not-the-probe").await;
        }
        EchoBehavior::Unresponsive => std::future::pending::<()>().await,
        _ => {
            let _ = write_string_async(&mut stream, &payload).await;
        }
    }
}

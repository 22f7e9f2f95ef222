//! Handle to one pooled worker: its process plus its socket identity.

use crate::launcher::WorkerProcess;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::{debug, error, info, warn};
use worker_spawner_core::framing::{read_string_async, write_string_async, write_tag_async};
use worker_spawner_core::{MessageTag, SELF_TEST_PAYLOAD};

/// How long a worker gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// A launched worker, owned by exactly one pool set at a time.
#[derive(Debug)]
pub struct WorkerHandle {
    process: Box<dyn WorkerProcess>,
    name: String,
    socket_dir: PathBuf,
}

impl WorkerHandle {
    pub fn new(process: Box<dyn WorkerProcess>, name: impl Into<String>, socket_dir: &Path) -> Self {
        Self {
            process,
            name: name.into(),
            socket_dir: socket_dir.to_path_buf(),
        }
    }

    /// Socket name handed to clients (e.g. `worker_3`).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir.join(&self.name)
    }

    /// Non-blocking liveness poll of the underlying process.
    pub fn is_alive(&mut self) -> bool {
        self.process.is_alive()
    }

    /// Round-trip the probe string over a fresh connection.
    ///
    /// Any failure (refused connection, timeout, wrong answer) means the
    /// worker is presumed dead; nothing is propagated.
    pub async fn self_test(&self, timeout: Duration) -> bool {
        debug!("Starting self-test on {}", self.name);
        let healthy = match tokio::time::timeout(timeout, self.probe()).await {
            Ok(Ok(true)) => true,
            Ok(Ok(false)) => {
                error!("Worker {} answered the self-test incorrectly", self.name);
                false
            }
            Ok(Err(e)) => {
                error!("Couldn't communicate with {}: {e}", self.name);
                false
            }
            Err(_) => {
                error!("Self-test on {} timed out after {timeout:?}", self.name);
                false
            }
        };
        debug!("Done with self-test on {} (healthy={healthy})", self.name);
        healthy
    }

    async fn probe(&self) -> io::Result<bool> {
        let mut stream = UnixStream::connect(self.socket_path()).await?;
        write_tag_async(&mut stream, MessageTag::SelfTest).await?;
        write_string_async(&mut stream, SELF_TEST_PAYLOAD).await?;
        let reply = read_string_async(&mut stream).await?;
        Ok(reply == SELF_TEST_PAYLOAD)
    }

    /// Terminate the process, wait for it, and unlink the socket.
    ///
    /// Never fails; calling it again on a torn-down worker is harmless.
    pub async fn teardown(&mut self) {
        warn!("Worker {} is being removed", self.name);
        if let Err(e) = self.process.terminate() {
            warn!("Failed to signal {}: {e}", self.name);
        }
        let exited = match tokio::time::timeout(TERMINATE_GRACE, self.process.wait()).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} ignored SIGTERM for {TERMINATE_GRACE:?}; killing it", self.name);
                if let Err(e) = self.process.kill() {
                    warn!("Failed to kill {}: {e}", self.name);
                }
                self.process.wait().await
            }
        };
        match exited {
            Ok(code) => info!("Terminated {} (exit code {code:?})", self.name),
            Err(e) => warn!("Failed to wait for {}: {e}", self.name),
        }
        self.remove_socket();
    }

    /// Collect an already-exited process and unlink its socket.
    pub async fn reap(&mut self) {
        if let Err(e) = self.process.wait().await {
            warn!("Failed to collect exit status of {}: {e}", self.name);
        }
        self.remove_socket();
    }

    /// Unlink the socket file without touching the process.
    pub fn remove_socket(&self) {
        remove_socket_file(&self.socket_path());
    }
}

/// Remove a socket file, treating "already gone" as success.
pub(crate) fn remove_socket_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed socket file {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove socket file {}: {e}", path.display()),
    }
}

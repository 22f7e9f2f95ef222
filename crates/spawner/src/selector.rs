//! Selector listener loop.
//!
//! Binds `socket_dir/selector_name`, then handles one connection at a time:
//! every request is read, dispatched to the [`WorkerPool`], and finished
//! before the next `accept`. When no connection arrives within the accept
//! poll interval the pool gets an idle tick so queued requests keep moving.
//!
//! ```text
//! 'X'           terminate all workers, stop
//! 'G'           answer with a worker name, or queue the connection
//! 'R' + name    close the connection, then take the worker back
//! ```

use crate::error::{Result, SpawnerError};
use crate::launcher::{CommandLauncher, ProcessLauncher};
use crate::pool::{PoolSettings, WorkerPool};
use crate::worker::remove_socket_file;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use worker_spawner_core::client::selector_is_listening;
use worker_spawner_core::framing::{read_string_async, read_tag_async};
use worker_spawner_core::{Config, MessageTag};

/// Pause after a failed `accept` before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

enum Flow {
    Continue,
    Stop,
}

/// The selector: a bound socket in front of a [`WorkerPool`].
#[derive(Debug)]
pub struct Selector {
    config: Config,
    pool: WorkerPool,
}

impl Selector {
    /// Selector that launches real worker processes.
    ///
    /// # Errors
    ///
    /// [`SpawnerError::NoWorkerCommand`] when no worker command is configured.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_launcher(config, Box::new(CommandLauncher))
    }

    /// Selector using a custom launcher.
    ///
    /// # Errors
    ///
    /// As [`Self::new`].
    pub fn with_launcher(config: Config, launcher: Box<dyn ProcessLauncher>) -> Result<Self> {
        let settings = PoolSettings::from_config(&config)?;
        Ok(Self {
            pool: WorkerPool::new(settings, launcher),
            config,
        })
    }

    pub fn socket_path(&self) -> PathBuf {
        self.config.selector_socket_path()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Bind the selector socket, clearing a stale file left by a crash.
    ///
    /// # Errors
    ///
    /// [`SpawnerError::SocketPathOccupied`] when another selector answers on
    /// the path or the stale file cannot be removed, [`SpawnerError::Bind`]
    /// when binding fails.
    pub fn bind(&self) -> Result<UnixListener> {
        let path = self.socket_path();
        std::fs::create_dir_all(&self.config.selector.socket_dir)?;

        if std::fs::symlink_metadata(&path).is_ok() {
            if selector_is_listening(&path) {
                return Err(SpawnerError::SocketPathOccupied {
                    path,
                    reason: "another selector is listening".to_string(),
                });
            }
            warn!("Removing stale selector socket {}", path.display());
            std::fs::remove_file(&path).map_err(|e| SpawnerError::SocketPathOccupied {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        }

        UnixListener::bind(&path).map_err(|source| SpawnerError::Bind { path, source })
    }

    /// Bind and serve until SHUTDOWN arrives or `cancel` fires.
    ///
    /// Every worker is torn down and the selector socket removed before this
    /// returns.
    ///
    /// # Errors
    ///
    /// Binding failures from [`Self::bind`].
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let listener = self.bind()?;
        let path = self.socket_path();
        info!("Selector listening on {}", path.display());

        self.serve(&listener, &cancel).await;

        drop(listener);
        remove_socket_file(&path);
        info!("Selector stopped");
        Ok(())
    }

    async fn serve(&mut self, listener: &UnixListener, cancel: &CancellationToken) {
        let accept_poll = self.config.accept_poll();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Interrupted; shutting down");
                    self.pool.terminate_all().await;
                    return;
                }
                accepted = tokio::time::timeout(accept_poll, listener.accept()) => {
                    match accepted {
                        Err(_) => {
                            if let Err(e) = self.pool.on_idle().await {
                                error!("Couldn't serve queued requests: {e}");
                            }
                        }
                        Ok(Ok((stream, _addr))) => {
                            if let Flow::Stop = self.dispatch(stream).await {
                                return;
                            }
                        }
                        Ok(Err(e)) => {
                            error!("Accept failed: {e}");
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, stream: UnixStream) -> Flow {
        match self.handle_connection(stream).await {
            Ok(Flow::Stop) => return Flow::Stop,
            Ok(Flow::Continue) => {}
            Err(e @ SpawnerError::ProtocolViolation(_)) => error!("Closed connection: {e}"),
            Err(e) => warn!("Connection failed: {e}"),
        }

        if let Err(e) = self.pool.fill_pending_requests_if_possible().await {
            error!("Couldn't serve queued requests: {e}");
        }
        Flow::Continue
    }

    async fn handle_connection(&mut self, mut stream: UnixStream) -> Result<Flow> {
        let read_timeout = self.config.self_test_timeout();

        let tag = tokio::time::timeout(read_timeout, read_tag_async(&mut stream))
            .await
            .map_err(|_| timed_out("request tag"))??;
        debug!("Received {tag}");

        match tag {
            MessageTag::Shutdown => {
                info!("Shutdown requested ({})", self.pool.stats());
                self.pool.terminate_all().await;
                Ok(Flow::Stop)
            }
            MessageTag::GetWorker => {
                self.pool.handle_get_worker(stream).await;
                Ok(Flow::Continue)
            }
            MessageTag::ReleaseWorker => {
                let name = tokio::time::timeout(read_timeout, read_string_async(&mut stream))
                    .await
                    .map_err(|_| timed_out("worker name"))??;
                drop(stream);
                self.pool.release_worker(&name).await?;
                Ok(Flow::Continue)
            }
            MessageTag::SelfTest => Err(SpawnerError::ProtocolViolation(
                "self-test sent to the selector".to_string(),
            )),
        }
    }
}

fn timed_out(what: &str) -> SpawnerError {
    SpawnerError::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("client did not send its {what} in time"),
    ))
}

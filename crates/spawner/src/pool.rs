//! Worker pool: matches queued GET_WORKER requests with idle or startable
//! workers.
//!
//! ## State
//!
//! - `busy`: workers currently handed to a client
//! - `waiting`: idle workers, oldest first
//! - `pending`: client connections still waiting for an answer, oldest first
//! - `next_index`: source of `worker_N` names; never reused
//!
//! A worker name appears in at most one of `busy`/`waiting`, and
//! `busy.len()` never exceeds `max_processes` when a limit is set. The pool
//! is driven from a single task; nothing here is shared across threads.
//!
//! ## Per-worker lifecycle
//!
//! ```text
//! starting ──▶ waiting ──▶ busy ──▶ waiting
//!    │            │          │
//!    └────────────┴──────────┴──▶ dead (torn down / reaped)
//! ```
//!
//! A worker popped from `waiting` is always self-tested before it is handed
//! out, and a released worker is self-tested before it re-enters `waiting`.

use crate::error::{Result, SpawnerError};
use crate::launcher::{CommandLine, LineCallback, ProcessLauncher};
use crate::worker::{WorkerHandle, remove_socket_file};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UnixStream;
use tracing::{debug, error, info, warn};
use worker_spawner_core::Config;
use worker_spawner_core::framing::write_string_async;

/// First sleep while waiting for a new worker's socket file.
const SOCKET_POLL_INITIAL: Duration = Duration::from_millis(1);

/// Upper bound on the socket-file poll interval.
const SOCKET_POLL_MAX: Duration = Duration::from_millis(50);

/// Give up on a request after this many freshly started workers fail their
/// first self-test in a row.
const MAX_FRESH_FAILURES: usize = 3;

/// No new worker is started for this long after a failed attempt to grow
/// the pool.
pub const GROWTH_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Immutable pool settings derived from [`Config`].
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub socket_dir: PathBuf,
    pub max_processes: Option<usize>,
    pub worker_command: CommandLine,
    pub startup_timeout: Duration,
    pub self_test_timeout: Duration,
    pub pending_timeout: Option<Duration>,
    pub growth_retry_backoff: Duration,
}

impl PoolSettings {
    /// # Errors
    ///
    /// [`SpawnerError::NoWorkerCommand`] when `workers.command` is empty.
    pub fn from_config(config: &Config) -> Result<Self> {
        let worker_command = CommandLine::from_parts(&config.workers.command)
            .ok_or(SpawnerError::NoWorkerCommand)?;
        Ok(Self {
            socket_dir: config.selector.socket_dir.clone(),
            max_processes: config.workers.max_processes,
            worker_command,
            startup_timeout: config.startup_timeout(),
            self_test_timeout: config.self_test_timeout(),
            pending_timeout: config.pending_timeout(),
            growth_retry_backoff: GROWTH_RETRY_BACKOFF,
        })
    }
}

/// A client connection that asked for a worker and has not been answered.
#[derive(Debug)]
pub struct PendingRequest {
    stream: UnixStream,
    queued_at: Instant,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub busy: usize,
    pub waiting: usize,
    pub pending: usize,
    pub next_index: u64,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} busy, {} idle, {} queued",
            self.busy, self.waiting, self.pending
        )
    }
}

enum SocketWait {
    Ready,
    Exited,
    TimedOut,
}

/// Owner of every worker handle and every queued request.
#[derive(Debug)]
pub struct WorkerPool {
    settings: PoolSettings,
    launcher: Box<dyn ProcessLauncher>,
    busy: Vec<WorkerHandle>,
    waiting: VecDeque<WorkerHandle>,
    pending: VecDeque<PendingRequest>,
    next_index: u64,
    growth_failed_at: Option<Instant>,
}

impl WorkerPool {
    pub fn new(settings: PoolSettings, launcher: Box<dyn ProcessLauncher>) -> Self {
        Self {
            settings,
            launcher,
            busy: Vec::new(),
            waiting: VecDeque::new(),
            pending: VecDeque::new(),
            next_index: 0,
            growth_failed_at: None,
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            busy: self.busy.len(),
            waiting: self.waiting.len(),
            pending: self.pending.len(),
            next_index: self.next_index,
        }
    }

    /// Names of busy workers, in assignment order.
    pub fn busy_names(&self) -> Vec<String> {
        self.busy.iter().map(|w| w.name().to_string()).collect()
    }

    /// Names of idle workers, oldest first.
    pub fn waiting_names(&self) -> Vec<String> {
        self.waiting.iter().map(|w| w.name().to_string()).collect()
    }

    /// True iff the pool is unbounded or has a free busy slot.
    pub fn can_start_worker(&self) -> bool {
        self.settings
            .max_processes
            .is_none_or(|max| self.busy.len() < max)
    }

    /// Launch `worker_<next_index>` and wait for its socket file.
    ///
    /// On success the new worker is appended to `waiting`. On failure the
    /// process is torn down and nothing is added.
    ///
    /// # Errors
    ///
    /// [`SpawnerError::Launch`], [`SpawnerError::StartupTimeout`], or
    /// [`SpawnerError::ExitedDuringStartup`].
    pub async fn start_worker(&mut self) -> Result<()> {
        let index = self.next_index;
        self.next_index += 1;

        let name = format!("worker_{index}");
        let socket_path = self.settings.socket_dir.join(&name);
        // Left over from an earlier selector that crashed.
        remove_socket_file(&socket_path);

        let command = self
            .settings
            .worker_command
            .clone()
            .with_arg(socket_path.to_string_lossy());
        let process = self.launcher.launch(
            &command,
            output_logger(&name, "out"),
            output_logger(&name, "err"),
        )?;
        let mut worker = WorkerHandle::new(process, &name, &self.settings.socket_dir);

        match wait_for_socket(&mut worker, self.settings.startup_timeout).await {
            SocketWait::Ready => {
                self.growth_failed_at = None;
                self.waiting.push_back(worker);
                info!("Started worker {name} ({})", self.stats());
                Ok(())
            }
            SocketWait::Exited => {
                worker.teardown().await;
                Err(SpawnerError::ExitedDuringStartup { worker: name })
            }
            SocketWait::TimedOut => {
                worker.teardown().await;
                Err(SpawnerError::StartupTimeout {
                    worker: name,
                    timeout: self.settings.startup_timeout,
                })
            }
        }
    }

    /// Drop busy workers whose process has exited.
    ///
    /// Returns whether anything was reaped, i.e. whether capacity may have
    /// been freed.
    pub async fn reap_dead_busy_workers(&mut self) -> bool {
        let mut reaped = 0;
        let mut index = 0;
        while index < self.busy.len() {
            if self.busy[index].is_alive() {
                index += 1;
                continue;
            }
            let mut worker = self.busy.remove(index);
            info!("Worker {} was busy but looks dead to us", worker.name());
            worker.reap().await;
            reaped += 1;
        }

        if reaped > 0 {
            info!("Reaped {reaped} dead worker(s); now {}", self.stats());
        }
        reaped > 0
    }

    /// Find a worker that passes its self-test, starting one if allowed.
    ///
    /// Returns `Ok(None)` when the pool is genuinely saturated.
    ///
    /// # Errors
    ///
    /// Propagates failures to start a new worker, and gives up with
    /// [`SpawnerError::UnhealthyWorkers`] when fresh workers keep failing.
    pub async fn get_valid_worker(&mut self) -> Result<Option<WorkerHandle>> {
        self.find_valid_worker(true).await
    }

    /// True while a recent failure to grow the pool holds off new starts.
    pub fn growth_backing_off(&self) -> bool {
        self.growth_failed_at
            .is_some_and(|at| at.elapsed() < self.settings.growth_retry_backoff)
    }

    /// [`Self::get_valid_worker`], but only starts a worker when
    /// `allow_growth` is set. Any error arms the growth backoff.
    async fn find_valid_worker(&mut self, allow_growth: bool) -> Result<Option<WorkerHandle>> {
        let result = self.find_valid_worker_inner(allow_growth).await;
        if result.is_err() {
            self.growth_failed_at = Some(Instant::now());
        }
        result
    }

    async fn find_valid_worker_inner(
        &mut self,
        allow_growth: bool,
    ) -> Result<Option<WorkerHandle>> {
        let mut just_started = false;
        let mut fresh_failures = 0;

        loop {
            if allow_growth && self.waiting.is_empty() && self.can_start_worker() {
                self.start_worker().await?;
                just_started = true;
            } else if let Some(mut worker) = self.waiting.pop_front() {
                let fresh = std::mem::take(&mut just_started);
                if worker.self_test(self.settings.self_test_timeout).await {
                    return Ok(Some(worker));
                }
                worker.teardown().await;

                if fresh {
                    fresh_failures += 1;
                    if fresh_failures >= MAX_FRESH_FAILURES {
                        return Err(SpawnerError::UnhealthyWorkers {
                            attempts: fresh_failures,
                        });
                    }
                }
            } else if !self.reap_dead_busy_workers().await {
                return Ok(None);
            }
        }
    }

    /// Answer a GET_WORKER connection now, or queue it.
    ///
    /// While growth is backing off only an idle worker can answer.
    pub async fn handle_get_worker(&mut self, mut stream: UnixStream) {
        let allow_growth = !self.growth_backing_off();
        match self.find_valid_worker(allow_growth).await {
            Ok(Some(worker)) => {
                let sent = respond(&mut stream, worker.name(), self.settings.self_test_timeout).await;
                match sent {
                    Ok(()) => {
                        let name = worker.name().to_string();
                        self.busy.push(worker);
                        info!("Assigned {name} ({})", self.stats());
                    }
                    Err(e) => {
                        warn!("Client left before receiving {}: {e}", worker.name());
                        self.waiting.push_front(worker);
                    }
                }
            }
            Ok(None) => {
                debug!("No worker available; queueing request");
                self.enqueue(stream);
            }
            Err(e) => {
                error!("Couldn't provide a worker: {e}");
                self.enqueue(stream);
            }
        }
    }

    /// Take `name` back from a client.
    ///
    /// A healthy worker goes to the oldest queued request, or to `waiting`
    /// when nothing is queued. An unhealthy one is torn down.
    ///
    /// # Errors
    ///
    /// [`SpawnerError::ProtocolViolation`] when `name` is not busy.
    pub async fn release_worker(&mut self, name: &str) -> Result<()> {
        let index = self
            .busy
            .iter()
            .position(|w| w.name() == name)
            .ok_or_else(|| {
                SpawnerError::ProtocolViolation(format!(
                    "release of {name:?}, which is not a busy worker"
                ))
            })?;
        let mut worker = self.busy.remove(index);

        if worker.self_test(self.settings.self_test_timeout).await {
            if self.pending.is_empty() {
                self.waiting.push_back(worker);
            } else {
                self.assign_worker_to_pending_request(worker).await;
            }
        } else {
            worker.teardown().await;
        }

        info!("Released {name} ({})", self.stats());
        Ok(())
    }

    /// Queue a connection that could not be answered yet.
    pub fn enqueue(&mut self, stream: UnixStream) {
        self.pending.push_back(PendingRequest {
            stream,
            queued_at: Instant::now(),
        });
    }

    /// Give `worker` to the oldest queued request that is still listening.
    ///
    /// Requests whose client has gone away are dropped. If no request is
    /// left the worker returns to `waiting`.
    pub async fn assign_worker_to_pending_request(&mut self, worker: WorkerHandle) {
        while let Some(mut request) = self.pending.pop_front() {
            let sent =
                respond(&mut request.stream, worker.name(), self.settings.self_test_timeout).await;
            match sent {
                Ok(()) => {
                    let name = worker.name().to_string();
                    self.busy.push(worker);
                    info!(
                        "Assigned {name} to a request queued {:?} ago ({})",
                        request.queued_at.elapsed(),
                        self.stats()
                    );
                    return;
                }
                Err(e) => warn!(
                    "Dropping abandoned request queued {:?} ago: {e}",
                    request.queued_at.elapsed()
                ),
            }
        }

        debug!("No queued request left for {}", worker.name());
        self.waiting.push_back(worker);
    }

    /// Serve queued requests while there is an idle worker or room to start
    /// one. No worker is started while growth is backing off.
    ///
    /// # Errors
    ///
    /// Propagates failures to start a worker; queued requests stay queued.
    pub async fn fill_pending_requests_if_possible(&mut self) -> Result<()> {
        self.expire_pending_requests();
        self.reap_dead_busy_workers().await;

        let allow_growth = !self.growth_backing_off();
        while !self.pending.is_empty()
            && (!self.waiting.is_empty() || (allow_growth && self.can_start_worker()))
        {
            match self.find_valid_worker(allow_growth).await? {
                Some(worker) => self.assign_worker_to_pending_request(worker).await,
                None => {
                    // Reachable when the last idle workers fail their
                    // self-test while the pool is at capacity.
                    warn!(
                        "No valid worker despite free capacity; {} request(s) stay queued",
                        self.pending.len()
                    );
                    break;
                }
            }
        }
        Ok(())
    }

    /// Housekeeping for a loop iteration without a new connection.
    ///
    /// # Errors
    ///
    /// As [`Self::fill_pending_requests_if_possible`].
    pub async fn on_idle(&mut self) -> Result<()> {
        self.expire_pending_requests();
        self.reap_dead_busy_workers().await;
        if self.pending.is_empty() {
            return Ok(());
        }
        self.fill_pending_requests_if_possible().await
    }

    /// Close queued requests older than the configured pending timeout.
    pub fn expire_pending_requests(&mut self) {
        let Some(timeout) = self.settings.pending_timeout else {
            return;
        };
        let before = self.pending.len();
        self.pending.retain(|request| request.queued_at.elapsed() < timeout);
        let expired = before - self.pending.len();
        if expired > 0 {
            warn!("Closed {expired} request(s) queued longer than {timeout:?}");
        }
    }

    /// Tear down every busy and idle worker and close queued requests.
    ///
    /// Best-effort: one worker's failure does not stop the others.
    pub async fn terminate_all(&mut self) {
        let workers: Vec<WorkerHandle> = self.busy.drain(..).chain(self.waiting.drain(..)).collect();
        info!("Terminating {} worker(s)", workers.len());
        for mut worker in workers {
            worker.teardown().await;
        }

        if !self.pending.is_empty() {
            info!(
                "Closing {} queued request(s) without a worker",
                self.pending.len()
            );
            self.pending.clear();
        }
    }
}

fn output_logger(worker: &str, stream: &'static str) -> LineCallback {
    let worker = worker.to_string();
    Arc::new(move |line: &str| info!("{worker} {stream}> {line}"))
}

async fn respond(stream: &mut UnixStream, name: &str, timeout: Duration) -> io::Result<()> {
    tokio::time::timeout(timeout, write_string_async(stream, name))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "client stopped reading"))?
}

async fn wait_for_socket(worker: &mut WorkerHandle, timeout: Duration) -> SocketWait {
    let socket_path = worker.socket_path();
    let deadline = Instant::now() + timeout;
    let mut delay = SOCKET_POLL_INITIAL;

    loop {
        if socket_exists(&socket_path) {
            return SocketWait::Ready;
        }
        if !worker.is_alive() {
            return SocketWait::Exited;
        }
        let now = Instant::now();
        if now >= deadline {
            return SocketWait::TimedOut;
        }
        tokio::time::sleep(delay.min(deadline - now)).await;
        delay = (delay * 2).min(SOCKET_POLL_MAX);
    }
}

fn socket_exists(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

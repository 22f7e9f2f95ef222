//! Configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Selector socket and loop settings
    #[serde(default)]
    pub selector: SelectorConfig,
    /// Worker pool settings
    #[serde(default)]
    pub workers: WorkersConfig,
}

/// Selector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Directory holding the selector socket and every worker socket
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,
    /// File name of the selector socket inside `socket_dir`
    #[serde(default = "default_selector_name")]
    pub name: String,
    /// How long one accept poll waits before servicing idle work
    #[serde(default = "default_accept_poll_ms")]
    pub accept_poll_ms: u64,
    /// Close queued GET_WORKER requests older than this (absent = never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_timeout_secs: Option<u64>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            socket_dir: default_socket_dir(),
            name: default_selector_name(),
            accept_poll_ms: default_accept_poll_ms(),
            pending_timeout_secs: None,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Program and leading arguments; the worker socket path is appended
    #[serde(default)]
    pub command: Vec<String>,
    /// Upper bound on busy workers (absent = unbounded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_processes: Option<usize>,
    /// How long a new worker has to create its socket file
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    /// Bound on a single self-test exchange
    #[serde(default = "default_self_test_timeout_ms")]
    pub self_test_timeout_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            max_processes: None,
            startup_timeout_secs: default_startup_timeout_secs(),
            self_test_timeout_ms: default_self_test_timeout_ms(),
        }
    }
}

fn default_socket_dir() -> PathBuf {
    std::env::temp_dir().join("worker-spawner")
}

fn default_selector_name() -> String {
    "selector".to_string()
}

fn default_accept_poll_ms() -> u64 {
    100
}

fn default_startup_timeout_secs() -> u64 {
    10
}

fn default_self_test_timeout_ms() -> u64 {
    5_000
}

impl Config {
    /// Full path of the selector socket.
    pub fn selector_socket_path(&self) -> PathBuf {
        self.selector.socket_dir.join(&self.selector.name)
    }

    /// Accept poll interval.
    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.selector.accept_poll_ms)
    }

    /// Pending-request expiry, if enabled.
    pub fn pending_timeout(&self) -> Option<Duration> {
        self.selector.pending_timeout_secs.map(Duration::from_secs)
    }

    /// Worker startup timeout.
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.workers.startup_timeout_secs)
    }

    /// Self-test timeout.
    pub fn self_test_timeout(&self) -> Duration {
        Duration::from_millis(self.workers.self_test_timeout_ms)
    }
}

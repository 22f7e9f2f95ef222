//! Error types for the selector and its worker pool

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while running the selector
#[derive(Error, Debug)]
pub enum SpawnerError {
    /// The worker executable could not be started
    #[error("failed to launch {command}: {source}")]
    Launch {
        command: String,
        source: std::io::Error,
    },

    /// A launched worker never created its socket file
    #[error("worker {worker} did not create its socket within {timeout:?}")]
    StartupTimeout { worker: String, timeout: Duration },

    /// A launched worker exited before creating its socket file
    #[error("worker {worker} exited before creating its socket")]
    ExitedDuringStartup { worker: String },

    /// Freshly started workers keep failing their first self-test
    #[error("{attempts} freshly started workers failed their first self-test")]
    UnhealthyWorkers { attempts: usize },

    /// The selector socket path is in use or cannot be cleared
    #[error("selector socket {path} is occupied: {reason}")]
    SocketPathOccupied { path: PathBuf, reason: String },

    /// Binding the selector socket failed
    #[error("failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A client broke the protocol (unknown tag, release of a worker it
    /// does not hold)
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// No worker command is configured
    #[error("no worker command configured")]
    NoWorkerCommand,

    /// Socket or process I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<worker_spawner_core::ProtocolError> for SpawnerError {
    fn from(err: worker_spawner_core::ProtocolError) -> Self {
        match err {
            worker_spawner_core::ProtocolError::UnknownTag(byte) => {
                Self::ProtocolViolation(format!("unknown message tag 0x{byte:02x}"))
            }
            worker_spawner_core::ProtocolError::Io(e) => Self::Io(e),
        }
    }
}

/// Result alias used across the selector
pub type Result<T> = std::result::Result<T, SpawnerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use worker_spawner_core::ProtocolError;

    #[test]
    fn test_unknown_tag_maps_to_protocol_violation() {
        let err: SpawnerError = ProtocolError::UnknownTag(0x7f).into();
        assert!(matches!(err, SpawnerError::ProtocolViolation(_)));
        assert_eq!(err.to_string(), "protocol violation: unknown message tag 0x7f");
    }

    #[test]
    fn test_protocol_io_maps_to_io() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "closed");
        let err: SpawnerError = ProtocolError::Io(io).into();
        assert!(matches!(err, SpawnerError::Io(_)));
    }

    #[test]
    fn test_startup_timeout_message_names_worker() {
        let err = SpawnerError::StartupTimeout {
            worker: "worker_3".to_string(),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(
            err.to_string(),
            "worker worker_3 did not create its socket within 10s"
        );
    }
}

//! Blocking client for a running selector.
//!
//! Each call opens a fresh connection to `socket_dir/selector_name`, writes
//! one request, and (for `get_worker`) waits for the answer:
//!
//! ```text
//! get_worker      →  'G'                 ←  worker socket name, then close
//! release_worker  →  'R' + name          ←  close
//! shutdown        →  'X'                 ←  close
//! ```
//!
//! `get_worker` blocks for as long as the pool is saturated. A selector that
//! closes the connection without answering (it is shutting down, or expired
//! the queued request) yields `Ok(None)`; callers should retry later.

use crate::config::Config;
use crate::framing::{read_string, write_string, write_tag};
use crate::protocol::MessageTag;
use std::io;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`SelectorClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// No selector is accepting connections at the socket path.
    #[error("selector unavailable at {path}: {source}")]
    Unavailable { path: PathBuf, source: io::Error },

    /// The exchange failed after a connection was established.
    #[error("I/O error talking to selector: {0}")]
    Io(#[from] io::Error),
}

/// Handle for issuing requests to one selector.
#[derive(Debug, Clone)]
pub struct SelectorClient {
    socket_dir: PathBuf,
    selector_name: String,
    read_timeout: Option<Duration>,
}

impl SelectorClient {
    /// Client for the selector named `selector_name` inside `socket_dir`.
    pub fn new(socket_dir: impl Into<PathBuf>, selector_name: impl Into<String>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            selector_name: selector_name.into(),
            read_timeout: None,
        }
    }

    /// Client for the selector described by a resolved [`Config`].
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.selector.socket_dir, &config.selector.name)
    }

    /// Give up waiting for a worker after `timeout` (default: wait forever).
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Path of the selector socket.
    pub fn selector_socket_path(&self) -> PathBuf {
        self.socket_dir.join(&self.selector_name)
    }

    /// Path of a worker socket given the name returned by [`Self::get_worker`].
    pub fn worker_socket_path(&self, worker_name: &str) -> PathBuf {
        self.socket_dir.join(worker_name)
    }

    /// Ask for a worker; blocks until one is assigned.
    pub fn get_worker(&self) -> Result<Option<String>, ClientError> {
        let mut stream = self.connect()?;
        stream.set_read_timeout(self.read_timeout)?;
        write_tag(&mut stream, MessageTag::GetWorker)?;

        match read_string(&mut stream) {
            Ok(name) => Ok(Some(name)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(ClientError::Io(e)),
        }
    }

    /// Hand `worker_name` back to the pool.
    pub fn release_worker(&self, worker_name: &str) -> Result<(), ClientError> {
        let mut stream = self.connect()?;
        write_tag(&mut stream, MessageTag::ReleaseWorker)?;
        write_string(&mut stream, worker_name)?;
        Ok(())
    }

    /// Ask the selector to terminate every worker and exit its loop.
    pub fn shutdown(&self) -> Result<(), ClientError> {
        let mut stream = self.connect()?;
        write_tag(&mut stream, MessageTag::Shutdown)?;
        Ok(())
    }

    fn connect(&self) -> Result<UnixStream, ClientError> {
        let path = self.selector_socket_path();
        UnixStream::connect(&path).map_err(|source| ClientError::Unavailable { path, source })
    }
}

/// Convenience: does anything accept connections at `path`?
pub fn selector_is_listening(path: &Path) -> bool {
    UnixStream::connect(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{read_string, read_tag};
    use std::os::unix::net::UnixListener;
    use std::thread;

    fn fake_selector(dir: &Path) -> UnixListener {
        UnixListener::bind(dir.join("selector")).unwrap()
    }

    #[test]
    fn test_get_worker_returns_assigned_name() {
        let temp = tempfile::tempdir().unwrap();
        let listener = fake_selector(temp.path());
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            assert_eq!(read_tag(&mut conn).unwrap(), MessageTag::GetWorker);
            write_string(&mut conn, "worker_0").unwrap();
        });

        let client = SelectorClient::new(temp.path(), "selector");
        assert_eq!(client.get_worker().unwrap().as_deref(), Some("worker_0"));
        assert_eq!(
            client.worker_socket_path("worker_0"),
            temp.path().join("worker_0")
        );
        server.join().unwrap();
    }

    #[test]
    fn test_get_worker_closed_without_answer_is_none() {
        let temp = tempfile::tempdir().unwrap();
        let listener = fake_selector(temp.path());
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            read_tag(&mut conn).unwrap();
            drop(conn);
        });

        let client = SelectorClient::new(temp.path(), "selector");
        assert!(client.get_worker().unwrap().is_none());
        server.join().unwrap();
    }

    #[test]
    fn test_release_worker_sends_tag_and_name() {
        let temp = tempfile::tempdir().unwrap();
        let listener = fake_selector(temp.path());
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            assert_eq!(read_tag(&mut conn).unwrap(), MessageTag::ReleaseWorker);
            read_string(&mut conn).unwrap()
        });

        SelectorClient::new(temp.path(), "selector")
            .release_worker("worker_7")
            .unwrap();
        assert_eq!(server.join().unwrap(), "worker_7");
    }

    #[test]
    fn test_shutdown_sends_tag() {
        let temp = tempfile::tempdir().unwrap();
        let listener = fake_selector(temp.path());
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            read_tag(&mut conn).unwrap()
        });

        SelectorClient::new(temp.path(), "selector").shutdown().unwrap();
        assert_eq!(server.join().unwrap(), MessageTag::Shutdown);
    }

    #[test]
    fn test_missing_selector_is_unavailable() {
        let temp = tempfile::tempdir().unwrap();
        let client = SelectorClient::new(temp.path(), "nobody-home");
        assert!(matches!(
            client.get_worker(),
            Err(ClientError::Unavailable { .. })
        ));
        assert!(!selector_is_listening(&client.selector_socket_path()));
    }

    #[test]
    fn test_from_config_uses_socket_dir_and_name() {
        let mut config = Config::default();
        config.selector.socket_dir = PathBuf::from("/run/pool");
        config.selector.name = "sel".to_string();
        let client = SelectorClient::from_config(&config);
        assert_eq!(client.selector_socket_path(), PathBuf::from("/run/pool/sel"));
    }
}

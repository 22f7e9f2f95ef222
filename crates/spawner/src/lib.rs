//! worker-spawner library crate.
//!
//! Provides the selector daemon: the process launcher, worker handles, the
//! worker pool, and the listener loop that serves GET_WORKER /
//! RELEASE_WORKER / SHUTDOWN requests. Exposed as a library for integration
//! testing and for embedding a selector in another process.

pub mod error;
pub mod launcher;
pub mod pool;
pub mod selector;
pub mod worker;

#[cfg(test)]
pub mod testing;

pub use error::{Result, SpawnerError};
pub use launcher::{CommandLauncher, CommandLine, ProcessLauncher, WorkerProcess};
pub use pool::{PoolSettings, PoolStats, WorkerPool};
pub use selector::Selector;
pub use worker::WorkerHandle;

//! Core types for the worker-spawner selector.
//!
//! This crate holds everything a client or a worker needs to speak to a
//! selector: the single-byte message tags, the length-prefixed string
//! framing, configuration resolution, and a blocking client.

#[cfg(unix)]
pub mod client;
pub mod config;
pub mod framing;
pub mod logging;
pub mod protocol;

#[cfg(unix)]
pub use client::{ClientError, SelectorClient};
pub use config::Config;
pub use protocol::{MessageTag, ProtocolError, SELF_TEST_PAYLOAD};

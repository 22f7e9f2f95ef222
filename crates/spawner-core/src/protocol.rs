//! Message tags for the selector socket protocol.
//!
//! Every connection to the selector (and every self-test connection to a
//! worker) starts with a single tag byte:
//!
//! | Tag              | Byte  | Payload that follows            |
//! |------------------|-------|---------------------------------|
//! | `Shutdown`       | `X`   | none                            |
//! | `GetWorker`      | `G`   | none                            |
//! | `ReleaseWorker`  | `R`   | worker socket name (string)     |
//! | `SelfTest`       | `T`   | probe string, echoed by worker  |
//!
//! Strings use the length-prefixed framing in [`crate::framing`].

use thiserror::Error;

/// Probe payload written by the selector during a worker self-test.
pub const SELF_TEST_PAYLOAD: &str = "msg";

/// Single-byte message tag that opens every protocol exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTag {
    /// Terminate every worker and stop the selector.
    Shutdown,
    /// Ask the selector for a worker socket name.
    GetWorker,
    /// Hand a worker back to the selector.
    ReleaseWorker,
    /// Liveness probe sent from the selector to a worker.
    SelfTest,
}

impl MessageTag {
    /// Wire byte for this tag.
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Shutdown => b'X',
            Self::GetWorker => b'G',
            Self::ReleaseWorker => b'R',
            Self::SelfTest => b'T',
        }
    }
}

impl TryFrom<u8> for MessageTag {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'X' => Ok(Self::Shutdown),
            b'G' => Ok(Self::GetWorker),
            b'R' => Ok(Self::ReleaseWorker),
            b'T' => Ok(Self::SelfTest),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

impl std::fmt::Display for MessageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shutdown => write!(f, "shutdown"),
            Self::GetWorker => write!(f, "get-worker"),
            Self::ReleaseWorker => write!(f, "release-worker"),
            Self::SelfTest => write!(f, "self-test"),
        }
    }
}

/// Errors raised while decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The leading byte is not one of the reserved tags.
    #[error("unknown message tag 0x{0:02x}")]
    UnknownTag(u8),

    /// Underlying stream failure (including a peer that closed mid-message).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

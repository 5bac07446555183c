//! Error types for the consensus transport.

use thiserror::Error;

/// Errors that can occur while publishing or receiving consensus messages.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to serialize or deserialize an envelope.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Envelope exceeds the maximum allowed size.
    #[error("message too large: {size} bytes (max {max} bytes)")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Transport-level I/O error.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The local node is disconnected from the fabric.
    #[error("node {0} is offline")]
    Offline(String),

    /// No peer could be reached.
    #[error("broadcast reached none of {0} peers")]
    Unreachable(usize),

    #[error("invalid transport config: {0}")]
    InvalidConfig(&'static str),
}

/// Convenience result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

//! Error types for purecall.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all purecall operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error during dial, send or receive.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet body is not a well-formed command envelope.
    ///
    /// At the connection layer this triggers a framer reset: once framing
    /// desynchronizes, nothing later in the buffered stream can be trusted.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The local executor rejected or failed a request command.
    ///
    /// Surfaced to the remote caller as a response with a nonzero errno,
    /// never as a transport failure.
    #[error("{0}")]
    Execution(String),

    /// The remote peer answered the call with a nonzero errno.
    #[error("{message}({errno})")]
    Remote {
        /// Error code reported by the peer.
        errno: i32,
        /// Human-readable cause reported by the peer.
        message: String,
    },

    /// No response arrived within the caller's deadline.
    #[error("timeout for call after {timeout:?}, command: {command}")]
    Timeout {
        /// The command text of the call that timed out.
        command: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// Address resolution produced no usable address.
    #[error("resolve error: {0}")]
    Resolve(String),

    /// The connection is closed and can no longer send.
    #[error("connection closed")]
    ConnectionClosed,

    /// No healthy pooled connection is available.
    #[error("pool exhausted, no healthy connection available")]
    PoolExhausted,
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;

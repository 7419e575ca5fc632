//! Error types for the Stratum v1 transport.

use thiserror::Error;

/// Stratum protocol errors.
#[derive(Error, Debug)]
pub enum StratumError {
    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or unexpected Stratum message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Peer closed the connection
    #[error("connection closed by peer")]
    Closed,

    /// Read or write was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Dial failed or timed out
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Timeout waiting for a response
    #[error("timeout waiting for response")]
    Timeout,
}

/// Convenient Result type for Stratum operations.
pub type StratumResult<T> = Result<T, StratumError>;

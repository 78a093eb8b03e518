//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] grackle_proto::Error),

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// Server returned a non-success status.
    #[error("server error {code}: {message}")]
    Server { code: u16, message: String },

    /// Server rejected the configured credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The pool has been closed.
    #[error("connection pool is closed")]
    PoolClosed,

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The frame carried a mime type this crate does not speak.
    #[error("unsupported mime type: {0}")]
    UnsupportedMimeType(String),

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

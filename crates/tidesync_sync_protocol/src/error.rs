//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors from encoding, decoding or validating protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A message could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// A body could not be parsed as the expected message.
    #[error("decode error: {0}")]
    Decode(String),

    /// A change set violates protocol rules.
    #[error("invalid change set: {0}")]
    InvalidChangeSet(String),
}

impl ProtocolError {
    /// Creates an invalid change set error.
    pub fn invalid_change_set(message: impl Into<String>) -> Self {
        Self::InvalidChangeSet(message.into())
    }
}

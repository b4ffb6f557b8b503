//! Error types for the sync engine.

use crate::applier::AppliedCounts;
use thiserror::Error;
use tidesync_core::CoreError;
use tidesync_sync_protocol::{ErrorBody, ProtocolError};

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A network call exceeded its timeout.
    #[error("request timed out")]
    Timeout,

    /// The credential was missing or rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Server answered with a non-2xx status.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Message from the error body.
        message: String,
    },

    /// Malformed request or response body.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Writing the pulled changes to the local store failed. The transaction
    /// was rolled back and the watermark is unchanged.
    #[error("local apply failed: {0}")]
    LocalApply(#[from] CoreError),

    /// The pull was applied and committed, then the push failed.
    ///
    /// The watermark has advanced; local changes stay queued.
    #[error("push failed after pull was applied: {source}")]
    PushFailed {
        /// What the committed pull applied.
        applied: AppliedCounts,
        /// The push-side failure.
        source: Box<SyncError>,
    },

    /// Another sync is running on this coordinator.
    #[error("a sync is already in progress")]
    AlreadySyncing,

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Endpoint or configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Maps a non-2xx response to an error.
    ///
    /// 401 and 403 are authentication failures; everything else is a server
    /// error carrying the body's `error` message (or the raw body text).
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        let message = tidesync_sync_protocol::decode::<ErrorBody>(body)
            .map(|b| b.error)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());

        match status {
            401 | 403 => Self::AuthenticationFailed(message),
            _ => Self::Server { status, message },
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Server { status, .. } => matches!(status, 408 | 429 | 500..=599),
            SyncError::PushFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::AlreadySyncing.is_retryable());
        assert!(!SyncError::AuthenticationFailed("nope".into()).is_retryable());
    }

    #[test]
    fn server_status_classification() {
        for status in [408, 429, 500, 503] {
            assert!(SyncError::from_status(status, b"").is_retryable(), "{status}");
        }
        for status in [400, 404, 409, 422] {
            assert!(!SyncError::from_status(status, b"").is_retryable(), "{status}");
        }
    }

    #[test]
    fn auth_statuses_map_to_authentication_failed() {
        let err = SyncError::from_status(401, br#"{"error":"token expired"}"#);
        assert!(matches!(err, SyncError::AuthenticationFailed(ref m) if m == "token expired"));
        assert!(matches!(
            SyncError::from_status(403, b"forbidden"),
            SyncError::AuthenticationFailed(_)
        ));
    }

    #[test]
    fn push_failed_inherits_retryability() {
        let err = SyncError::PushFailed {
            applied: AppliedCounts::default(),
            source: Box::new(SyncError::transport_retryable("reset")),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("reset"));
    }

    #[test]
    fn error_display() {
        let err = SyncError::from_status(500, br#"{"error":"db down"}"#);
        assert_eq!(err.to_string(), "server error 500: db down");
    }
}

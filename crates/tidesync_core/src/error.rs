//! Error types for the tidesync record store.

use crate::types::RecordId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in record store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tidesync_storage::StorageError),

    /// A persisted value could not be encoded or decoded.
    #[error("encoding error: {message}")]
    Encoding {
        /// Description of the failure.
        message: String,
    },

    /// Collection is not part of the schema.
    #[error("unknown collection: {name}")]
    UnknownCollection {
        /// Name of the collection.
        name: String,
    },

    /// Field is not a column of the collection.
    #[error("unknown field {field} in collection {collection}")]
    UnknownField {
        /// Collection name.
        collection: String,
        /// Offending field name.
        field: String,
    },

    /// Record does not exist.
    #[error("record not found: {id} in collection {collection}")]
    RecordNotFound {
        /// Collection searched.
        collection: String,
        /// Missing record ID.
        id: RecordId,
    },

    /// Record with this ID already exists.
    #[error("record already exists: {id} in collection {collection}")]
    RecordAlreadyExists {
        /// Collection name.
        collection: String,
        /// Duplicate record ID.
        id: RecordId,
    },

    /// Record is soft-deleted and cannot be modified.
    #[error("record is deleted: {id} in collection {collection}")]
    RecordDeleted {
        /// Collection name.
        collection: String,
        /// Deleted record ID.
        id: RecordId,
    },

    /// A record payload is malformed.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of the problem.
        message: String,
    },

    /// Schema definition or migration is inconsistent.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// Transaction was aborted by its body.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },
}

impl CoreError {
    /// Creates an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates an unknown collection error.
    pub fn unknown_collection(name: impl Into<String>) -> Self {
        Self::UnknownCollection { name: name.into() }
    }

    /// Creates a record not found error.
    pub fn not_found(collection: impl Into<String>, id: RecordId) -> Self {
        Self::RecordNotFound {
            collection: collection.into(),
            id,
        }
    }
}

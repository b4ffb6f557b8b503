//! Protocol messages for pull and push.

use crate::changes::ChangeSet;
use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tidesync_core::SchemaChanges;

/// Path of the pull endpoint, relative to the sync endpoint.
pub const PULL_PATH: &str = "/sync/pull";
/// Path of the push endpoint, relative to the sync endpoint.
pub const PUSH_PATH: &str = "/sync/push";

/// Columns added to an existing collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigratedColumns {
    /// Collection name.
    pub table: String,
    /// New columns.
    pub columns: Vec<String>,
}

/// Schema migration descriptor sent with a pull.
///
/// Tells the server which collections and columns appeared since the
/// client's last synced schema version, so it can include their existing
/// rows in the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationInfo {
    /// Last synced schema version.
    pub from: u32,
    /// Collections created since `from`.
    pub tables: Vec<String>,
    /// Columns added since `from`.
    pub columns: Vec<MigratedColumns>,
}

impl From<SchemaChanges> for MigrationInfo {
    fn from(changes: SchemaChanges) -> Self {
        Self {
            from: changes.from,
            tables: changes.tables,
            columns: changes
                .columns
                .into_iter()
                .map(|(table, columns)| MigratedColumns { table, columns })
                .collect(),
        }
    }
}

/// Pull request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Sync watermark, `null` on first sync.
    pub last_pulled_at: Option<i64>,
    /// Client schema version.
    pub schema_version: u32,
    /// Present only when the schema grew since the last sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration: Option<MigrationInfo>,
}

/// Pull response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Changes since the requested watermark.
    pub changes: ChangeSet,
    /// Server time the changes are current as of; the next watermark.
    pub timestamp: i64,
}

/// Push request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Local changes to apply on the server.
    pub changes: ChangeSet,
    /// Watermark committed by the pull that preceded this push.
    pub last_pulled_at: i64,
}

/// Error body returned by the server on non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
}

/// Encodes a message as a JSON body.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn encode<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    serde_json::to_vec(message).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decodes a JSON body.
///
/// # Errors
///
/// Returns [`ProtocolError::Decode`] if the body is not the expected shape.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

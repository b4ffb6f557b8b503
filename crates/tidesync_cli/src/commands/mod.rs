//! CLI command implementations.

pub mod records;
pub mod status;
pub mod sync;

use std::path::Path;
use std::sync::Arc;
use tidesync_core::{RecordStore, Schema};
use tidesync_sync_engine::{HttpTransport, SyncConfig, SyncCoordinator};

/// File holding the store inside the store directory.
pub const STORE_FILE: &str = "tidesync.db";

/// Opens the store under `dir`, creating it if needed.
pub fn open_store(dir: &Path) -> Result<Arc<RecordStore>, Box<dyn std::error::Error>> {
    let store = RecordStore::open_file(dir.join(STORE_FILE), Schema::app_default())?;
    Ok(Arc::new(store))
}

/// Builds a coordinator talking HTTP.
pub fn coordinator(
    store: Arc<RecordStore>,
) -> Result<SyncCoordinator<HttpTransport>, Box<dyn std::error::Error>> {
    Ok(SyncCoordinator::new(
        store,
        HttpTransport::new()?,
        SyncConfig::default(),
    ))
}

/// Sync server endpoint and credential.
#[derive(Debug, Clone)]
pub struct Remote {
    /// Base URL.
    pub endpoint: String,
    /// Bearer token.
    pub token: String,
}

impl Remote {
    /// Builds the remote from CLI options.
    pub fn from_options(
        endpoint: Option<&str>,
        token: Option<&str>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let endpoint = endpoint.ok_or("Sync endpoint required (--endpoint or TIDESYNC_ENDPOINT)")?;
        let token = token.ok_or("Sync token required (--token or TIDESYNC_TOKEN)")?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            token: token.to_string(),
        })
    }
}

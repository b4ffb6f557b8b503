//! Status and reset commands.

use super::coordinator;
use serde::Serialize;
use std::sync::Arc;
use tidesync_core::RecordStore;
use tidesync_sync_engine::{is_due, CoordinatorStatus, DEFAULT_SYNC_INTERVAL};

/// Sync status report.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Sync watermark (Unix millis), if any.
    pub watermark: Option<i64>,
    /// Last fully successful sync (Unix millis), if any.
    pub last_synced_at: Option<i64>,
    /// Records waiting to be pushed.
    pub pending_changes: usize,
    /// Pending records per collection.
    pub pending_by_collection: Vec<(String, usize)>,
    /// Whether a sync is due under the default interval.
    pub sync_due: bool,
}

impl StatusReport {
    /// Builds the report from a coordinator snapshot and the store.
    pub fn new(status: &CoordinatorStatus, store: &RecordStore) -> Self {
        let pending = store.pending_changes();
        Self {
            watermark: status.watermark.map(|t| t.as_millis()),
            last_synced_at: status.last_synced_at.map(|t| t.as_millis()),
            pending_changes: status.pending_changes,
            pending_by_collection: pending
                .collections
                .iter()
                .map(|(name, changes)| (name.clone(), changes.len()))
                .collect(),
            sync_due: is_due(status.last_synced_at, DEFAULT_SYNC_INTERVAL),
        }
    }
}

/// Runs the status command.
pub fn run(store: Arc<RecordStore>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let status = coordinator(Arc::clone(&store))?.status();
    let report = StatusReport::new(&status, &store);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let show = |value: Option<i64>| value.map_or_else(|| "never".to_string(), |v| v.to_string());
    println!("Watermark:       {}", show(report.watermark));
    println!("Last synced at:  {}", show(report.last_synced_at));
    println!("Pending changes: {}", report.pending_changes);
    for (collection, count) in &report.pending_by_collection {
        println!("  {collection}: {count}");
    }
    println!("Sync due:        {}", if report.sync_due { "yes" } else { "no" });
    Ok(())
}

/// Runs the reset command.
pub fn reset(store: Arc<RecordStore>) -> Result<(), Box<dyn std::error::Error>> {
    coordinator(store)?.reset()?;
    println!("Sync metadata cleared; the next sync downloads everything");
    Ok(())
}

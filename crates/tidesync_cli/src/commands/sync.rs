//! Sync and pull commands.

use super::{coordinator, Remote};
use std::sync::Arc;
use tidesync_core::RecordStore;
use tidesync_sync_engine::{is_due, SyncError};

/// How a sync command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Not due; nothing to do.
    Skip,
    /// One cycle.
    Once,
    /// Cycles with backoff until success or a permanent error.
    WithRetry,
}

impl SyncMode {
    /// Picks the mode from the `--if-due` and `--retry` flags.
    pub fn select(if_due: bool, retry: bool, due: bool) -> Self {
        if if_due && !due {
            Self::Skip
        } else if retry {
            Self::WithRetry
        } else {
            Self::Once
        }
    }
}

/// Runs the sync command.
pub async fn run(
    store: Arc<RecordStore>,
    remote: &Remote,
    if_due: bool,
    retry: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = coordinator(store)?;
    let due = is_due(coordinator.last_synced_at(), coordinator.config().sync_interval);

    let outcome = match SyncMode::select(if_due, retry, due) {
        SyncMode::Skip => Ok(None),
        SyncMode::WithRetry => coordinator
            .sync_with_retry(&remote.endpoint, &remote.token)
            .await
            .map(Some),
        SyncMode::Once => coordinator
            .sync(&remote.endpoint, &remote.token)
            .await
            .map(Some),
    };

    match outcome {
        Ok(Some(result)) => {
            println!(
                "Synced: {} created, {} updated, {} deleted, {} pushed ({} ms)",
                result.applied.created,
                result.applied.updated,
                result.applied.deleted,
                result.pushed,
                result.duration.as_millis()
            );
            println!("Watermark: {}", result.watermark.as_millis());
            Ok(())
        }
        Ok(None) => {
            println!("Sync not due");
            Ok(())
        }
        Err(SyncError::PushFailed { applied, source }) => {
            println!(
                "Pulled {} changes, but push failed; local changes stay queued",
                applied.total()
            );
            Err((*source).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Runs the pull command.
pub async fn pull(store: Arc<RecordStore>, remote: &Remote) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = coordinator(store)?;
    let result = coordinator.pull_only(&remote.endpoint, &remote.token).await?;
    println!(
        "Pulled: {} created, {} updated, {} deleted ({} ms)",
        result.applied.created,
        result.applied.updated,
        result.applied.deleted,
        result.duration.as_millis()
    );
    println!("Watermark: {}", result.watermark.as_millis());
    Ok(())
}

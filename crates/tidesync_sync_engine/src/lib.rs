//! # tidesync Sync Engine
//!
//! Sync coordinator and timing policy for tidesync.
//!
//! This crate provides:
//! - Sync coordinator (idle → pulling → applying → pushing → synced)
//! - Watermark management in the local store
//! - Field-level merge of pulled changes with pending local edits
//! - Retry with exponential backoff
//! - HTTP, loopback and mock transports
//! - The "is a sync due" timing policy
//!
//! ## Architecture
//!
//! The engine implements a **pull-then-push** synchronization model:
//! 1. Pull remote changes since the watermark
//! 2. Apply them locally, with the new watermark, in one store commit
//! 3. Push pending local changes
//!
//! ## Key Invariants
//!
//! - Pull always happens before push
//! - One sync at a time per coordinator
//! - Applying a pull is atomic and idempotent
//! - The watermark never moves backwards

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod config;
mod coordinator;
mod error;
mod http;
mod timing;
mod transport;

pub use applier::{
    apply_change_set, AppliedCounts, PullApplied, StoreApplier, LAST_PULLED_AT_KEY,
    LAST_SYNCED_AT_KEY, LAST_SYNCED_SCHEMA_VERSION_KEY,
};
pub use config::{RetryConfig, SyncConfig};
pub use coordinator::{
    CoordinatorStatus, PullResult, SyncCoordinator, SyncCycleResult, SyncState, SyncStats,
};
pub use error::{SyncError, SyncResult};
pub use http::{join_url, HttpTransport, LoopbackServer, LoopbackTransport};
pub use timing::{is_due, is_due_at, DEFAULT_SYNC_INTERVAL};
pub use transport::{MockTransport, SyncTransport};

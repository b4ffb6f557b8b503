//! # tidesync Core
//!
//! Local record store for tidesync.
//!
//! This crate provides:
//! - Schema-checked record collections with soft delete
//! - Single-writer transactions committed atomically to a storage backend
//! - Scalar metadata committed in the same unit as records
//! - The pending change log (sync status per record)
//! - A change feed of committed changes
//!
//! The store knows nothing about the network. The sync engine reads the
//! change log through [`RecordStore::pending_changes`] and applies remote
//! deltas through [`Transaction::put`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod changes;
mod error;
mod record;
mod schema;
mod store;
mod transaction;
mod types;

pub use change_feed::{ChangeEvent, ChangeFeed, ChangeOrigin, ChangeType};
pub use changes::{LocalChanges, LocalCollectionChanges};
pub use error::{CoreError, CoreResult};
pub use record::{Fields, Record, SyncStatus};
pub use schema::{
    CollectionSchema, Migration, MigrationStep, Schema, SchemaChanges, RESERVED_COLUMNS,
};
pub use store::RecordStore;
pub use transaction::Transaction;
pub use types::{RecordId, SequenceNumber, Timestamp};

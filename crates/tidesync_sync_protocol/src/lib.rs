//! # tidesync Sync Protocol
//!
//! Wire types of the tidesync pull/push protocol.
//!
//! This crate provides:
//! - [`ChangeSet`] with per-collection created/updated/deleted buckets
//! - Pull and push request/response bodies
//! - The schema migration descriptor sent with a pull
//! - JSON encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod changes;
mod error;
mod messages;

pub use changes::{raw_id, ChangeSet, CollectionChanges, RawRecord};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    decode, encode, ErrorBody, MigratedColumns, MigrationInfo, PullRequest, PullResponse,
    PushRequest, PULL_PATH, PUSH_PATH,
};

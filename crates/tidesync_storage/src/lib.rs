//! # tidesync Storage
//!
//! Key-value storage backends for tidesync.
//!
//! Backends are **opaque byte stores** keyed by strings. The record store
//! above them decides what the keys mean (one key per collection snapshot,
//! one key per scalar metadata value); backends only guarantee that a
//! [`WriteBatch`] lands completely or not at all.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral stores
//! - [`FileBackend`] - Single-file persistent storage with atomic replace
//!
//! ## Example
//!
//! ```rust
//! use tidesync_storage::{InMemoryBackend, StorageBackend, WriteBatch};
//!
//! let backend = InMemoryBackend::new();
//! let mut batch = WriteBatch::new();
//! batch.put("greeting", b"hello".to_vec());
//! backend.write_batch(batch).unwrap();
//! assert_eq!(backend.get("greeting").unwrap(), Some(b"hello".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{BatchOp, StorageBackend, WriteBatch};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;

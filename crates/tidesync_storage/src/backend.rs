//! Storage backend trait definition.

use crate::error::StorageResult;

/// A single operation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or replace the value under a key.
    Put {
        /// Key to write.
        key: String,
        /// New value.
        value: Vec<u8>,
    },
    /// Remove a key. Removing an absent key is not an error.
    Delete {
        /// Key to remove.
        key: String,
    },
}

impl BatchOp {
    /// Returns the key this operation touches.
    pub fn key(&self) -> &str {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// An ordered set of writes applied atomically by [`StorageBackend::write_batch`].
///
/// Later operations on the same key win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a put.
    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value,
        });
        self
    }

    /// Queues a delete.
    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::Delete { key: key.into() });
        self
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns the queued operations in order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Consumes the batch, yielding its operations.
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// A durable key-value backend for tidesync.
///
/// Backends are **opaque byte stores**. They do not interpret values; the
/// record store owns the encoding of collection snapshots and metadata.
///
/// # Invariants
///
/// - `get` returns exactly the bytes last written under that key
/// - `write_batch` is all-or-nothing: after a crash either every operation
///   of the batch is visible or none is
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Applies every operation of `batch` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be made durable. In that case
    /// none of its operations are visible.
    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Returns all keys that start with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Writes a single value.
    ///
    /// # Errors
    ///
    /// Same as [`StorageBackend::write_batch`].
    fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write_batch(batch)
    }

    /// Removes a single key.
    ///
    /// # Errors
    ///
    /// Same as [`StorageBackend::write_batch`].
    fn delete(&self, key: &str) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write_batch(batch)
    }
}

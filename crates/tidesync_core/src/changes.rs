//! Snapshot of pending local changes.

use crate::record::{Record, SyncStatus};
use std::collections::BTreeMap;

/// Pending local changes of one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalCollectionChanges {
    /// Records created locally and never pushed.
    pub created: Vec<Record>,
    /// Records updated locally since the last push.
    pub updated: Vec<Record>,
    /// Records deleted locally, deletion not yet pushed.
    pub deleted: Vec<Record>,
}

impl LocalCollectionChanges {
    /// Returns true if no bucket holds a record.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total records across buckets.
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    pub(crate) fn push(&mut self, record: Record) {
        match record.status {
            SyncStatus::Created => self.created.push(record),
            SyncStatus::Updated => self.updated.push(record),
            SyncStatus::Deleted => self.deleted.push(record),
            SyncStatus::Synced => {}
        }
    }
}

/// Pending local changes across collections, taken at one point in time.
///
/// Each record appears in exactly one bucket, chosen by its sync status.
/// Every record carries the `local_version` it had when the snapshot was
/// taken, so [`crate::RecordStore::mark_synced`] can skip records edited
/// again after the snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalChanges {
    /// Changes by collection name. Collections without changes are absent.
    pub collections: BTreeMap<String, LocalCollectionChanges>,
}

impl LocalChanges {
    /// Returns true if there is nothing to push.
    pub fn is_empty(&self) -> bool {
        self.collections.values().all(LocalCollectionChanges::is_empty)
    }

    /// Total pending records.
    pub fn record_count(&self) -> usize {
        self.collections.values().map(LocalCollectionChanges::len).sum()
    }

    /// Iterates `(collection, record)` pairs over every bucket.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.collections.iter().flat_map(|(name, changes)| {
            changes
                .created
                .iter()
                .chain(&changes.updated)
                .chain(&changes.deleted)
                .map(move |r| (name.as_str(), r))
        })
    }
}

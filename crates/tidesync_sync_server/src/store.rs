//! Authoritative server-side record store.

use crate::error::{ServerError, ServerResult};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tidesync_core::Timestamp;
use tidesync_sync_protocol::{
    raw_id, ChangeSet, MigrationInfo, PullRequest, PullResponse, PushRequest, RawRecord,
};

/// A record as the server keeps it.
#[derive(Debug, Clone, PartialEq)]
struct Entry {
    /// Wire form as last pushed.
    record: RawRecord,
    /// Server time the record was first stored.
    created_at: i64,
    /// Server time of the last change.
    changed_at: i64,
    deleted: bool,
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<(String, String), Entry>,
    clock: i64,
}

impl Inner {
    /// Advances the server clock. Never returns the same value twice, even
    /// if the wall clock stalls or moves back.
    fn tick(&mut self) -> i64 {
        self.clock = Timestamp::now().as_millis().max(self.clock + 1);
        self.clock
    }
}

/// Summary of an accepted push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOutcome {
    /// Records written or deleted.
    pub applied: usize,
    /// Server time stamped on them.
    pub timestamp: i64,
}

/// In-memory authoritative store.
///
/// The server store maintains:
/// - Every record by `(collection, id)`, including tombstones
/// - The server time each record was created and last changed
/// - A strictly increasing server clock
#[derive(Debug, Default)]
pub struct ServerStore {
    inner: RwLock<Inner>,
}

impl ServerStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last server time handed out.
    pub fn clock(&self) -> i64 {
        self.inner.read().clock
    }

    /// Returns the number of stored records, tombstones included.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Returns true if nothing was ever stored.
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Returns a live record.
    pub fn get(&self, collection: &str, id: &str) -> Option<RawRecord> {
        self.inner
            .read()
            .records
            .get(&(collection.to_string(), id.to_string()))
            .filter(|e| !e.deleted)
            .map(|e| e.record.clone())
    }

    /// Returns true if a tombstone exists for the record.
    pub fn is_deleted(&self, collection: &str, id: &str) -> bool {
        self.inner
            .read()
            .records
            .get(&(collection.to_string(), id.to_string()))
            .is_some_and(|e| e.deleted)
    }

    /// Inserts or replaces a record as a server-side write.
    pub fn upsert(&self, collection: &str, record: RawRecord) -> ServerResult<i64> {
        let id = raw_id(&record)
            .ok_or_else(|| ServerError::InvalidRequest("record without string id".into()))?
            .to_string();
        let mut inner = self.inner.write();
        let now = inner.tick();
        write_record(&mut inner.records, collection, id, record, now);
        Ok(now)
    }

    /// Soft-deletes a record as a server-side write. Returns false if absent.
    pub fn delete(&self, collection: &str, id: &str) -> bool {
        let mut inner = self.inner.write();
        let now = inner.tick();
        delete_record(&mut inner.records, collection, id, now)
    }

    /// Builds the pull response for `request`.
    ///
    /// With no watermark every live record is returned as created. Otherwise
    /// records changed after the watermark are bucketed by whether they were
    /// first stored after it, and tombstones go to `deleted`. The returned
    /// timestamp is a fresh server time, so no later write can fall at or
    /// below it.
    pub fn pull(&self, request: &PullRequest) -> PullResponse {
        let mut inner = self.inner.write();
        let timestamp = inner.tick();
        let mut changes = ChangeSet::new();
        let mut included = BTreeSet::new();

        for ((collection, id), entry) in &inner.records {
            let bucket = match request.last_pulled_at {
                None if entry.deleted => continue,
                None => Bucket::Created,
                Some(since) if entry.changed_at <= since => continue,
                Some(_) if entry.deleted => Bucket::Deleted,
                Some(since) if entry.created_at > since => Bucket::Created,
                Some(_) => Bucket::Updated,
            };
            bucket.push(&mut changes, collection, id, entry);
            included.insert((collection.as_str(), id.as_str()));
        }

        if let (Some(_), Some(migration)) = (request.last_pulled_at, &request.migration) {
            add_migrated(&inner.records, migration, &included, &mut changes);
        }

        PullResponse { changes, timestamp }
    }

    /// Applies a push.
    ///
    /// Rejects the whole push with [`ServerError::Conflict`] if any pushed
    /// record changed on the server after `request.last_pulled_at`. Upserts
    /// of records the server already deleted are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidRequest`] for malformed change sets.
    pub fn push(&self, request: &PushRequest) -> ServerResult<PushOutcome> {
        request.changes.validate()?;
        let mut inner = self.inner.write();

        for (collection, changes) in request.changes.iter() {
            let upserts = changes.created.iter().chain(&changes.updated);
            let ids = upserts
                .filter_map(raw_id)
                .chain(changes.deleted.iter().map(String::as_str));
            for id in ids {
                let key = (collection.to_string(), id.to_string());
                if let Some(entry) = inner.records.get(&key) {
                    if entry.changed_at > request.last_pulled_at {
                        return Err(ServerError::Conflict {
                            collection: key.0,
                            id: key.1,
                        });
                    }
                }
            }
        }

        let now = inner.tick();
        let mut applied = 0;
        for (collection, changes) in request.changes.iter() {
            for record in changes.created.iter().chain(&changes.updated) {
                let Some(id) = raw_id(record) else { continue };
                let key = (collection.to_string(), id.to_string());
                if inner.records.get(&key).is_some_and(|e| e.deleted) {
                    continue;
                }
                write_record(&mut inner.records, collection, key.1, record.clone(), now);
                applied += 1;
            }
            for id in &changes.deleted {
                if delete_record(&mut inner.records, collection, id, now) {
                    applied += 1;
                }
            }
        }

        Ok(PushOutcome {
            applied,
            timestamp: now,
        })
    }
}

#[derive(Clone, Copy)]
enum Bucket {
    Created,
    Updated,
    Deleted,
}

impl Bucket {
    fn push(self, changes: &mut ChangeSet, collection: &str, id: &str, entry: &Entry) {
        let target = changes.collection_mut(collection);
        match self {
            Bucket::Created => target.created.push(entry.record.clone()),
            Bucket::Updated => target.updated.push(entry.record.clone()),
            Bucket::Deleted => target.deleted.push(id.to_string()),
        }
    }
}

fn write_record(
    records: &mut BTreeMap<(String, String), Entry>,
    collection: &str,
    id: String,
    mut record: RawRecord,
    now: i64,
) {
    record.insert("id".into(), Value::String(id.clone()));
    let key = (collection.to_string(), id);
    let created_at = records.get(&key).map_or(now, |e| e.created_at);
    records.insert(
        key,
        Entry {
            record,
            created_at,
            changed_at: now,
            deleted: false,
        },
    );
}

fn delete_record(
    records: &mut BTreeMap<(String, String), Entry>,
    collection: &str,
    id: &str,
    now: i64,
) -> bool {
    match records.get_mut(&(collection.to_string(), id.to_string())) {
        Some(entry) if !entry.deleted => {
            entry.deleted = true;
            entry.changed_at = now;
            true
        }
        _ => false,
    }
}

/// Adds live rows of collections and columns that appeared in the client's
/// schema since its last sync.
fn add_migrated(
    records: &BTreeMap<(String, String), Entry>,
    migration: &MigrationInfo,
    included: &BTreeSet<(&str, &str)>,
    changes: &mut ChangeSet,
) {
    let new_tables: BTreeSet<&str> = migration.tables.iter().map(String::as_str).collect();
    let grown_tables: BTreeSet<&str> = migration
        .columns
        .iter()
        .map(|c| c.table.as_str())
        .filter(|t| !new_tables.contains(t))
        .collect();

    for ((collection, id), entry) in records {
        if entry.deleted || included.contains(&(collection.as_str(), id.as_str())) {
            continue;
        }
        if new_tables.contains(collection.as_str()) {
            Bucket::Created.push(changes, collection, id, entry);
        } else if grown_tables.contains(collection.as_str()) {
            Bucket::Updated.push(changes, collection, id, entry);
        }
    }
}

//! Store-backed delta application.
//!
//! [`StoreApplier`] owns everything the coordinator persists: it applies a
//! pulled [`ChangeSet`] and the new watermark in one store transaction, hands
//! out the pending push buffer, and acknowledges pushed records.
//!
//! # Apply rules
//!
//! All `created` entries of the response are applied first, then all
//! `updated`, then all `deleted`:
//!
//! - `created` / `updated`: upsert by ID. An absent record is inserted. A
//!   present one is overwritten, except that columns with a pending local
//!   change keep the local value and the record stays pending. A local
//!   tombstone ignores remote upserts.
//! - `deleted`: soft-delete if present, no-op if absent. Remote deletes win
//!   over pending local edits.
//!
//! Applying the same response twice leaves the store as applying it once.

use crate::error::SyncResult;
use std::sync::Arc;
use tidesync_core::{
    ChangeOrigin, CollectionSchema, LocalChanges, Record, RecordId, RecordStore, SyncStatus,
    Timestamp, Transaction,
};
use tidesync_sync_protocol::{ChangeSet, MigrationInfo, PullResponse, RawRecord};
use tracing::{debug, warn};

/// Metadata key of the sync watermark.
pub const LAST_PULLED_AT_KEY: &str = "__tidesync_last_pulled_at";
/// Metadata key of the last fully successful sync time.
pub const LAST_SYNCED_AT_KEY: &str = "__tidesync_last_synced_at";
/// Metadata key of the schema version of the last applied pull.
pub const LAST_SYNCED_SCHEMA_VERSION_KEY: &str = "__tidesync_last_synced_schema_version";

/// Records applied by one pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedCounts {
    /// Entries of the `created` buckets written.
    pub created: usize,
    /// Entries of the `updated` buckets written.
    pub updated: usize,
    /// Records newly soft-deleted.
    pub deleted: usize,
}

impl AppliedCounts {
    /// Total records written.
    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Outcome of applying a pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullApplied {
    /// What was written.
    pub counts: AppliedCounts,
    /// Watermark committed with the changes.
    pub watermark: Timestamp,
}

/// Applies pulls to a [`RecordStore`] and tracks sync metadata in it.
#[derive(Clone)]
pub struct StoreApplier {
    store: Arc<RecordStore>,
}

impl StoreApplier {
    /// Creates an applier over `store`.
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Returns the sync watermark, `None` if never synced.
    pub fn watermark(&self) -> Option<Timestamp> {
        self.store
            .get_local(LAST_PULLED_AT_KEY)
            .map(Timestamp::from_millis)
    }

    /// Returns the time of the last fully successful sync.
    pub fn last_synced_at(&self) -> Option<Timestamp> {
        self.store
            .get_local(LAST_SYNCED_AT_KEY)
            .map(Timestamp::from_millis)
    }

    /// Returns the schema version recorded by the last applied pull.
    pub fn last_synced_schema_version(&self) -> Option<u32> {
        self.store
            .get_local(LAST_SYNCED_SCHEMA_VERSION_KEY)
            .and_then(|v| u32::try_from(v).ok())
    }

    /// Builds the migration descriptor for the next pull.
    ///
    /// Only sent once a watermark exists and the schema has grown since the
    /// last synced version. A first sync downloads everything anyway.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema's migrations do not cover the range.
    pub fn migration(&self) -> SyncResult<Option<MigrationInfo>> {
        if self.watermark().is_none() {
            return Ok(None);
        }
        let current = self.store.schema().version();
        match self.last_synced_schema_version() {
            Some(from) if from < current => {
                let changes = self.store.schema().changes_since(from)?;
                Ok(Some(changes.into()))
            }
            _ => Ok(None),
        }
    }

    /// Applies a pull response and advances the watermark, atomically.
    ///
    /// The watermark becomes `max(stored, response.timestamp)`; a response
    /// older than the stored watermark is applied but does not move it back.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::LocalApply`] if any record cannot be
    /// applied. Nothing is written in that case.
    pub fn apply_pull(&self, response: &PullResponse) -> SyncResult<PullApplied> {
        let schema_version = i64::from(self.store.schema().version());

        let applied = self.store.transaction(|txn| {
            let counts = apply_change_set(txn, &response.changes)?;

            let watermark = match txn.get_local(LAST_PULLED_AT_KEY) {
                Some(stored) if stored > response.timestamp => {
                    warn!(
                        stored,
                        received = response.timestamp,
                        "server timestamp is older than the watermark, keeping watermark"
                    );
                    stored
                }
                _ => response.timestamp,
            };
            txn.set_local(LAST_PULLED_AT_KEY, watermark);
            txn.set_local(LAST_SYNCED_SCHEMA_VERSION_KEY, schema_version);

            Ok(PullApplied {
                counts,
                watermark: Timestamp::from_millis(watermark),
            })
        })?;

        debug!(
            created = applied.counts.created,
            updated = applied.counts.updated,
            deleted = applied.counts.deleted,
            watermark = %applied.watermark,
            "applied pull"
        );
        Ok(applied)
    }

    /// Snapshots the pending push buffer.
    pub fn pending(&self) -> LocalChanges {
        self.store.pending_changes()
    }

    /// Marks a pushed snapshot as synced. Returns how many records changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store commit fails.
    pub fn acknowledge(&self, pushed: &LocalChanges) -> SyncResult<usize> {
        Ok(self.store.mark_synced(pushed)?)
    }

    /// Records the time of a fully successful sync.
    ///
    /// # Errors
    ///
    /// Returns an error if the store commit fails.
    pub fn record_success(&self, at: Timestamp) -> SyncResult<()> {
        self.store.transaction(|txn| {
            txn.set_local(LAST_SYNCED_AT_KEY, at.as_millis());
            Ok(())
        })?;
        Ok(())
    }

    /// Forgets all sync metadata so the next sync downloads everything.
    ///
    /// Records and their pending changes are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the store commit fails.
    pub fn reset(&self) -> SyncResult<()> {
        self.store.transaction(|txn| {
            txn.remove_local(LAST_PULLED_AT_KEY);
            txn.remove_local(LAST_SYNCED_AT_KEY);
            txn.remove_local(LAST_SYNCED_SCHEMA_VERSION_KEY);
            Ok(())
        })?;
        Ok(())
    }
}

/// Stages a whole change set in `txn`: creates, then updates, then deletes.
///
/// # Errors
///
/// Returns the first record error; the caller's transaction then discards
/// everything staged here.
pub fn apply_change_set(
    txn: &mut Transaction<'_>,
    changes: &ChangeSet,
) -> tidesync_core::CoreResult<AppliedCounts> {
    let mut counts = AppliedCounts::default();
    let known: Vec<(&str, CollectionSchema)> = changes
        .iter()
        .filter_map(|(name, _)| match txn.schema().collection(name) {
            Some(schema) => Some((name, schema.clone())),
            None => {
                warn!(collection = name, "ignoring changes for unknown collection");
                None
            }
        })
        .collect();

    for (name, schema) in &known {
        for raw in changes.collection(name).map_or(&[][..], |c| c.created.as_slice()) {
            if upsert(txn, name, schema, raw)? {
                counts.created += 1;
            }
        }
    }
    for (name, schema) in &known {
        for raw in changes.collection(name).map_or(&[][..], |c| c.updated.as_slice()) {
            if upsert(txn, name, schema, raw)? {
                counts.updated += 1;
            }
        }
    }
    for (name, _) in &known {
        for id in changes.collection(name).map_or(&[][..], |c| c.deleted.as_slice()) {
            if delete(txn, name, &RecordId::new(id.clone()))? {
                counts.deleted += 1;
            }
        }
    }
    Ok(counts)
}

fn upsert(
    txn: &mut Transaction<'_>,
    collection: &str,
    schema: &CollectionSchema,
    raw: &RawRecord,
) -> tidesync_core::CoreResult<bool> {
    let remote = Record::from_raw(raw, schema)?;
    let record = match txn.get(collection, &remote.id)? {
        None => remote,
        Some(local) if local.deleted => {
            debug!(collection, id = %local.id, "remote upsert of a tombstone ignored");
            return Ok(false);
        }
        Some(local) => merge(local, remote),
    };
    txn.put(collection, record, ChangeOrigin::Remote)?;
    Ok(true)
}

fn delete(
    txn: &mut Transaction<'_>,
    collection: &str,
    id: &RecordId,
) -> tidesync_core::CoreResult<bool> {
    let Some(mut record) = txn.get(collection, id)? else {
        return Ok(false);
    };
    let newly_deleted = !record.deleted;
    if !newly_deleted && record.status == SyncStatus::Synced {
        return Ok(false);
    }

    record.deleted = true;
    record.status = SyncStatus::Synced;
    record.changed.clear();
    txn.put(collection, record, ChangeOrigin::Remote)?;
    Ok(newly_deleted)
}

/// Merges a remote version into a live local record.
fn merge(local: Record, mut remote: Record) -> Record {
    match local.status {
        SyncStatus::Synced | SyncStatus::Deleted => {}
        SyncStatus::Created => {
            for (key, value) in &local.fields {
                remote.fields.insert(key.clone(), value.clone());
            }
        }
        SyncStatus::Updated => {
            for key in &local.changed {
                match local.fields.get(key) {
                    Some(value) => remote.fields.insert(key.clone(), value.clone()),
                    None => remote.fields.remove(key),
                };
            }
        }
    }

    remote.created_at = local.created_at;
    remote.updated_at = local.updated_at.max(remote.updated_at);
    remote.status = local.status;
    remote.changed = local.changed;
    remote.local_version = local.local_version;
    remote
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tidesync_core::{Fields, Schema};

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn applier() -> StoreApplier {
        StoreApplier::new(Arc::new(RecordStore::in_memory(Schema::app_default())))
    }

    fn response(changes: Value, timestamp: i64) -> PullResponse {
        PullResponse {
            changes: serde_json::from_value(changes).unwrap(),
            timestamp,
        }
    }

    #[test]
    fn pending_local_columns_survive_remote_update() {
        let applier = applier();
        let store = applier.store();
        applier
            .apply_pull(&response(
                json!({"posts": {"created": [{"id": "p1", "title": "A", "body": "x"}]}}),
                10,
            ))
            .unwrap();
        store
            .update("posts", &RecordId::from("p1"), fields(json!({"title": "Local"})))
            .unwrap();

        applier
            .apply_pull(&response(
                json!({"posts": {"updated": [{"id": "p1", "title": "Remote", "body": "y"}]}}),
                20,
            ))
            .unwrap();

        let post = store.get("posts", &RecordId::from("p1")).unwrap().unwrap();
        assert_eq!(post.fields["title"], json!("Local"));
        assert_eq!(post.fields["body"], json!("y"));
        assert_eq!(post.status, SyncStatus::Updated);
        assert!(post.changed.contains("title"));
    }

    #[test]
    fn remote_delete_wins_over_local_edit() {
        let applier = applier();
        let store = applier.store();
        applier
            .apply_pull(&response(json!({"posts": {"created": [{"id": "p1"}]}}), 10))
            .unwrap();
        store
            .update("posts", &RecordId::from("p1"), fields(json!({"title": "mine"})))
            .unwrap();

        let applied = applier
            .apply_pull(&response(json!({"posts": {"deleted": ["p1"]}}), 20))
            .unwrap();

        assert_eq!(applied.counts.deleted, 1);
        let post = store.get("posts", &RecordId::from("p1")).unwrap().unwrap();
        assert!(post.deleted);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn local_tombstone_ignores_remote_upsert() {
        let applier = applier();
        let store = applier.store();
        let post = store.create("posts", Fields::new()).unwrap();
        store.mark_deleted("posts", &post.id).unwrap();

        let applied = applier
            .apply_pull(&response(
                json!({"posts": {"updated": [{"id": post.id.as_str(), "title": "back"}]}}),
                5,
            ))
            .unwrap();

        assert_eq!(applied.counts.updated, 0);
        let stored = store.get("posts", &post.id).unwrap().unwrap();
        assert!(stored.deleted);
        assert_eq!(stored.status, SyncStatus::Deleted);
    }

    #[test]
    fn delete_of_absent_record_is_noop() {
        let applier = applier();
        let applied = applier
            .apply_pull(&response(json!({"users": {"deleted": ["ghost"]}}), 5))
            .unwrap();
        assert_eq!(applied.counts, AppliedCounts::default());
        assert!(applier.store().list_all("users").unwrap().is_empty());
    }

    #[test]
    fn unknown_collection_is_skipped() {
        let applier = applier();
        let applied = applier
            .apply_pull(&response(
                json!({"widgets": {"created": [{"id": "w1"}]}, "users": {"created": [{"id": "u1"}]}}),
                5,
            ))
            .unwrap();
        assert_eq!(applied.counts.created, 1);
    }

    #[test]
    fn watermark_never_moves_back() {
        let applier = applier();
        applier.apply_pull(&response(json!({}), 2000)).unwrap();
        let applied = applier.apply_pull(&response(json!({}), 1500)).unwrap();

        assert_eq!(applied.watermark, Timestamp::from_millis(2000));
        assert_eq!(applier.watermark(), Some(Timestamp::from_millis(2000)));
    }

    #[test]
    fn reset_clears_metadata_but_keeps_records() {
        let applier = applier();
        applier
            .apply_pull(&response(json!({"users": {"created": [{"id": "u1"}]}}), 10))
            .unwrap();
        applier.record_success(Timestamp::from_millis(11)).unwrap();

        applier.reset().unwrap();
        assert_eq!(applier.watermark(), None);
        assert_eq!(applier.last_synced_at(), None);
        assert_eq!(applier.last_synced_schema_version(), None);
        assert_eq!(applier.store().list("users").unwrap().len(), 1);
    }

    #[test]
    fn migration_sent_only_after_schema_growth() {
        use tidesync_core::{Migration, MigrationStep};

        let backend: Arc<dyn tidesync_storage::StorageBackend> =
            Arc::new(tidesync_storage::InMemoryBackend::new());
        let v1 = Schema::new(1, vec![CollectionSchema::new("posts", ["title"])]).unwrap();
        let old = StoreApplier::new(Arc::new(
            RecordStore::open(Arc::clone(&backend), v1).unwrap(),
        ));
        assert_eq!(old.migration().unwrap(), None);
        old.apply_pull(&response(json!({}), 10)).unwrap();
        assert_eq!(old.migration().unwrap(), None);

        let v2 = Schema::new(
            2,
            vec![
                CollectionSchema::new("posts", ["title", "subtitle"]),
                CollectionSchema::new("tags", ["label"]),
            ],
        )
        .unwrap()
        .with_migrations(vec![Migration {
            to_version: 2,
            steps: vec![
                MigrationStep::AddColumns {
                    collection: "posts".into(),
                    columns: vec!["subtitle".into()],
                },
                MigrationStep::CreateCollection(CollectionSchema::new("tags", ["label"])),
            ],
        }])
        .unwrap();
        let upgraded = StoreApplier::new(Arc::new(RecordStore::open(backend, v2).unwrap()));

        let migration = upgraded.migration().unwrap().unwrap();
        assert_eq!(migration.from, 1);
        assert_eq!(migration.tables, vec!["tags".to_string()]);
        assert_eq!(migration.columns[0].table, "posts");

        upgraded.apply_pull(&response(json!({}), 20)).unwrap();
        assert_eq!(upgraded.migration().unwrap(), None);
    }
}

//! Record store facade.

use crate::change_feed::{ChangeEvent, ChangeFeed};
use crate::changes::{LocalChanges, LocalCollectionChanges};
use crate::error::{CoreError, CoreResult};
use crate::record::{Fields, Record, SyncStatus};
use crate::schema::Schema;
use crate::transaction::{Staged, Transaction};
use crate::types::{RecordId, SequenceNumber, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tidesync_storage::{FileBackend, InMemoryBackend, StorageBackend, WriteBatch};
use tracing::{debug, warn};

const RECORDS_PREFIX: &str = "records/";
const LOCAL_PREFIX: &str = "local/";

/// Committed in-memory state of a store.
#[derive(Debug, Default, Clone)]
pub(crate) struct StoreState {
    pub collections: BTreeMap<String, BTreeMap<RecordId, Record>>,
    pub locals: BTreeMap<String, i64>,
    pub sequence: SequenceNumber,
}

/// The local record store.
///
/// `RecordStore` holds the collections declared by its [`Schema`] plus a
/// small set of scalar metadata values. It provides:
/// - Single-writer transactions that commit atomically to the backend
/// - Local create/update/soft-delete with sync status tracking
/// - The pending change log that feeds a push
/// - A change feed of committed changes
///
/// ```rust
/// use tidesync_core::{RecordStore, Schema, SyncStatus};
/// use serde_json::json;
///
/// let store = RecordStore::in_memory(Schema::app_default());
/// let fields = json!({"title": "Hello"}).as_object().cloned().unwrap();
/// let post = store.create("posts", fields).unwrap();
///
/// assert_eq!(post.status, SyncStatus::Created);
/// assert_eq!(store.pending_count(), 1);
/// ```
pub struct RecordStore {
    schema: Schema,
    backend: Arc<dyn StorageBackend>,
    state: RwLock<StoreState>,
    writer: Mutex<()>,
    feed: ChangeFeed,
}

impl RecordStore {
    /// Opens a store over `backend`, loading persisted collections and
    /// metadata.
    ///
    /// Persisted collections that the schema no longer declares are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or holds undecodable
    /// data.
    pub fn open(backend: Arc<dyn StorageBackend>, schema: Schema) -> CoreResult<Self> {
        let mut state = StoreState::default();

        for name in schema.collection_names() {
            if let Some(bytes) = backend.get(&collection_key(name))? {
                let records = decode_collection(&bytes)?;
                state.collections.insert(
                    name.to_string(),
                    records.into_iter().map(|r| (r.id.clone(), r)).collect(),
                );
            }
        }

        for key in backend.keys_with_prefix(LOCAL_PREFIX)? {
            if let Some(bytes) = backend.get(&key)? {
                let value = decode_local(&key, &bytes)?;
                state
                    .locals
                    .insert(key[LOCAL_PREFIX.len()..].to_string(), value);
            }
        }

        debug!(
            collections = state.collections.len(),
            locals = state.locals.len(),
            "opened record store"
        );

        Ok(Self {
            schema,
            backend,
            state: RwLock::new(state),
            writer: Mutex::new(()),
            feed: ChangeFeed::new(),
        })
    }

    /// Opens (or creates) a store persisted in a single file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is corrupted.
    pub fn open_file(path: impl AsRef<Path>, schema: Schema) -> CoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path.as_ref())?;
        Self::open(Arc::new(backend), schema)
    }

    /// Creates an empty in-memory store.
    #[must_use]
    pub fn in_memory(schema: Schema) -> Self {
        Self {
            schema,
            backend: Arc::new(InMemoryBackend::new()),
            state: RwLock::new(StoreState::default()),
            writer: Mutex::new(()),
            feed: ChangeFeed::new(),
        }
    }

    /// Returns the schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Executes a function within a transaction.
    ///
    /// If the function returns `Ok`, every staged write (records and
    /// metadata) is written to the backend in one atomic batch and then
    /// published. If it returns `Err`, or the backend write fails, nothing
    /// changes.
    ///
    /// Transactions are serialized; only one runs at a time.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or the commit error.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> CoreResult<T>,
    {
        let _writer = self.writer.lock();

        let (value, staged) = {
            let state = self.state.read();
            let mut txn = Transaction::new(&self.schema, &state, Timestamp::now());
            let value = f(&mut txn)?;
            (value, txn.into_staged())
        };

        if !staged.is_empty() {
            self.commit(staged)?;
        }
        Ok(value)
    }

    fn commit(&self, staged: Staged) -> CoreResult<()> {
        let mut touched: BTreeMap<String, BTreeMap<RecordId, Record>> = BTreeMap::new();
        {
            let state = self.state.read();
            for ((collection, id), write) in &staged.writes {
                touched
                    .entry(collection.clone())
                    .or_insert_with(|| {
                        state
                            .collections
                            .get(collection)
                            .cloned()
                            .unwrap_or_default()
                    })
                    .insert(id.clone(), write.record.clone());
            }
        }

        let mut batch = WriteBatch::new();
        for (name, records) in &touched {
            batch.put(collection_key(name), encode_collection(records)?);
        }
        for (key, value) in &staged.locals {
            match value {
                Some(value) => batch.put(local_key(key), value.to_le_bytes().to_vec()),
                None => batch.delete(local_key(key)),
            };
        }

        if let Err(e) = self.backend.write_batch(batch) {
            warn!(error = %e, "commit failed, transaction discarded");
            return Err(e.into());
        }

        let sequence = {
            let mut state = self.state.write();
            for (name, records) in touched {
                state.collections.insert(name, records);
            }
            for (key, value) in staged.locals {
                match value {
                    Some(value) => state.locals.insert(key, value),
                    None => state.locals.remove(&key),
                };
            }
            state.sequence = state.sequence.next();
            state.sequence
        };

        let events: Vec<ChangeEvent> = staged
            .writes
            .into_iter()
            .filter_map(|((collection, record_id), write)| {
                write.event.map(|(change_type, origin)| ChangeEvent {
                    sequence,
                    collection,
                    record_id,
                    change_type,
                    origin,
                })
            })
            .collect();

        debug!(%sequence, events = events.len(), "committed transaction");
        self.feed.emit_batch(events);
        Ok(())
    }

    /// Creates a record with a generated ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection or a field is unknown.
    pub fn create(&self, collection: &str, fields: Fields) -> CoreResult<Record> {
        self.transaction(|txn| txn.create(collection, fields))
    }

    /// Creates a record with a caller-chosen ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is taken or a field is unknown.
    pub fn create_with_id(
        &self,
        collection: &str,
        id: RecordId,
        fields: Fields,
    ) -> CoreResult<Record> {
        self.transaction(|txn| txn.create_with_id(collection, id, fields))
    }

    /// Updates fields of a live record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing or deleted.
    pub fn update(&self, collection: &str, id: &RecordId, patch: Fields) -> CoreResult<Record> {
        self.transaction(|txn| txn.update(collection, id, patch))
    }

    /// Soft-deletes a live record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing or already deleted.
    pub fn mark_deleted(&self, collection: &str, id: &RecordId) -> CoreResult<Record> {
        self.transaction(|txn| txn.mark_deleted(collection, id))
    }

    /// Reads a record, including tombstones.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownCollection`] for undeclared collections.
    pub fn get(&self, collection: &str, id: &RecordId) -> CoreResult<Option<Record>> {
        self.schema.require(collection)?;
        Ok(self
            .state
            .read()
            .collections
            .get(collection)
            .and_then(|records| records.get(id))
            .cloned())
    }

    /// Lists live (not deleted) records, ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownCollection`] for undeclared collections.
    pub fn list(&self, collection: &str) -> CoreResult<Vec<Record>> {
        Ok(self
            .list_all(collection)?
            .into_iter()
            .filter(|r| !r.deleted)
            .collect())
    }

    /// Lists every record including tombstones, ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownCollection`] for undeclared collections.
    pub fn list_all(&self, collection: &str) -> CoreResult<Vec<Record>> {
        self.schema.require(collection)?;
        Ok(self
            .state
            .read()
            .collections
            .get(collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Reads a committed metadata value.
    pub fn get_local(&self, key: &str) -> Option<i64> {
        self.state.read().locals.get(key).copied()
    }

    /// Snapshots every record with a pending local change.
    pub fn pending_changes(&self) -> LocalChanges {
        let state = self.state.read();
        let mut changes = LocalChanges::default();
        for (name, records) in &state.collections {
            let mut bucket = LocalCollectionChanges::default();
            for record in records.values().filter(|r| r.is_pending()) {
                bucket.push(record.clone());
            }
            if !bucket.is_empty() {
                changes.collections.insert(name.clone(), bucket);
            }
        }
        changes
    }

    /// Counts records with a pending local change.
    pub fn pending_count(&self) -> usize {
        self.state
            .read()
            .collections
            .values()
            .flat_map(BTreeMap::values)
            .filter(|r| r.is_pending())
            .count()
    }

    /// Marks the records of a pushed snapshot as synced.
    ///
    /// A record is only marked if its `local_version` still matches the
    /// snapshot; records edited while the push was in flight stay pending.
    /// Emits no change events. Returns the number of records marked.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn mark_synced(&self, pushed: &LocalChanges) -> CoreResult<usize> {
        self.transaction(|txn| {
            let mut marked = 0;
            for (collection, sent) in pushed.iter() {
                let Some(mut current) = txn.get(collection, &sent.id)? else {
                    continue;
                };
                if current.local_version != sent.local_version {
                    continue;
                }
                current.status = SyncStatus::Synced;
                current.changed.clear();
                txn.put_silent(collection, current);
                marked += 1;
            }
            Ok(marked)
        })
    }

    /// Subscribes to committed change events.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    /// Polls change events committed after `cursor`.
    pub fn poll(&self, cursor: SequenceNumber, limit: usize) -> Vec<ChangeEvent> {
        self.feed.poll(cursor, limit)
    }

    /// Returns the sequence number of the last commit.
    pub fn committed_seq(&self) -> SequenceNumber {
        self.state.read().sequence
    }
}

fn collection_key(name: &str) -> String {
    format!("{RECORDS_PREFIX}{name}")
}

fn local_key(key: &str) -> String {
    format!("{LOCAL_PREFIX}{key}")
}

fn encode_collection(records: &BTreeMap<RecordId, Record>) -> CoreResult<Vec<u8>> {
    let list: Vec<&Record> = records.values().collect();
    let mut bytes = Vec::new();
    ciborium::into_writer(&list, &mut bytes).map_err(|e| CoreError::encoding(e.to_string()))?;
    Ok(bytes)
}

fn decode_collection(bytes: &[u8]) -> CoreResult<Vec<Record>> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::encoding(e.to_string()))
}

fn decode_local(key: &str, bytes: &[u8]) -> CoreResult<i64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| CoreError::encoding(format!("{key}: expected 8 bytes, got {}", bytes.len())))?;
    Ok(i64::from_le_bytes(raw))
}

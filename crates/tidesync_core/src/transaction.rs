//! Store transactions.
//!
//! A [`Transaction`] is a write overlay on top of the committed store state.
//! Reads inside the transaction see its own staged writes. Nothing becomes
//! visible to other readers, or reaches the backend, until
//! [`crate::RecordStore::transaction`] commits it.

use crate::change_feed::{ChangeOrigin, ChangeType};
use crate::error::{CoreError, CoreResult};
use crate::record::{Fields, Record};
use crate::schema::Schema;
use crate::store::StoreState;
use crate::types::{RecordId, Timestamp};
use std::collections::BTreeMap;

/// A staged record write.
#[derive(Debug, Clone)]
pub(crate) struct StagedWrite {
    pub record: Record,
    /// `None` for bookkeeping writes that emit no change event.
    pub event: Option<(ChangeType, ChangeOrigin)>,
}

/// Everything a transaction staged, ready for commit.
#[derive(Debug, Default)]
pub(crate) struct Staged {
    pub writes: BTreeMap<(String, RecordId), StagedWrite>,
    /// `Some` sets a metadata value, `None` removes it.
    pub locals: BTreeMap<String, Option<i64>>,
}

impl Staged {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.locals.is_empty()
    }
}

/// An open store transaction.
///
/// Obtained through [`crate::RecordStore::transaction`]. Returning `Err`
/// from the closure discards every staged write.
pub struct Transaction<'a> {
    schema: &'a Schema,
    base: &'a StoreState,
    now: Timestamp,
    staged: Staged,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(schema: &'a Schema, base: &'a StoreState, now: Timestamp) -> Self {
        Self {
            schema,
            base,
            now,
            staged: Staged::default(),
        }
    }

    pub(crate) fn into_staged(self) -> Staged {
        self.staged
    }

    /// Returns the clock reading taken when the transaction began.
    ///
    /// All local mutations in one transaction share this timestamp.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Returns the store schema.
    pub fn schema(&self) -> &Schema {
        self.schema
    }

    /// Reads a record, including tombstones.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownCollection`] for undeclared collections.
    pub fn get(&self, collection: &str, id: &RecordId) -> CoreResult<Option<Record>> {
        self.schema.require(collection)?;
        let key = (collection.to_string(), id.clone());
        if let Some(staged) = self.staged.writes.get(&key) {
            return Ok(Some(staged.record.clone()));
        }
        Ok(self
            .base
            .collections
            .get(collection)
            .and_then(|records| records.get(id))
            .cloned())
    }

    /// Lists every record of a collection, tombstones included, ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownCollection`] for undeclared collections.
    pub fn records(&self, collection: &str) -> CoreResult<Vec<Record>> {
        self.schema.require(collection)?;
        let mut merged: BTreeMap<RecordId, Record> = self
            .base
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default();
        for ((name, id), staged) in &self.staged.writes {
            if name == collection {
                merged.insert(id.clone(), staged.record.clone());
            }
        }
        Ok(merged.into_values().collect())
    }

    /// Creates a record with a generated ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection is unknown or a field is not a
    /// declared column.
    pub fn create(&mut self, collection: &str, fields: Fields) -> CoreResult<Record> {
        self.create_with_id(collection, RecordId::generate(), fields)
    }

    /// Creates a record with a caller-chosen ID.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecordAlreadyExists`] if the ID is taken, even by
    /// a tombstone.
    pub fn create_with_id(
        &mut self,
        collection: &str,
        id: RecordId,
        fields: Fields,
    ) -> CoreResult<Record> {
        self.check_fields(collection, &fields)?;
        if self.get(collection, &id)?.is_some() {
            return Err(CoreError::RecordAlreadyExists {
                collection: collection.to_string(),
                id,
            });
        }

        let record = Record::new_local(id, fields, self.now);
        self.put(collection, record.clone(), ChangeOrigin::Local)?;
        Ok(record)
    }

    /// Applies a local update to a live record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing or deleted, or if a field is
    /// not a declared column.
    pub fn update(&mut self, collection: &str, id: &RecordId, patch: Fields) -> CoreResult<Record> {
        self.check_fields(collection, &patch)?;
        let mut record = self.live(collection, id)?;
        if record.apply_local_update(patch, self.now) {
            self.put(collection, record.clone(), ChangeOrigin::Local)?;
        }
        Ok(record)
    }

    /// Soft-deletes a live record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing or already deleted.
    pub fn mark_deleted(&mut self, collection: &str, id: &RecordId) -> CoreResult<Record> {
        let mut record = self.live(collection, id)?;
        record.mark_local_deleted(self.now);
        self.put(collection, record.clone(), ChangeOrigin::Local)?;
        Ok(record)
    }

    /// Stages a record as-is, replacing any record with the same ID.
    ///
    /// This is the raw path used to apply remote deltas. No column checks
    /// or status transitions happen here; the caller owns the record state.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownCollection`] for undeclared collections.
    pub fn put(&mut self, collection: &str, record: Record, origin: ChangeOrigin) -> CoreResult<()> {
        self.schema.require(collection)?;
        let was_deleted = self.base_record(collection, &record.id).map(|r| r.deleted);
        let change = match (was_deleted, record.deleted) {
            (None | Some(false), true) => ChangeType::Delete,
            (None, false) => ChangeType::Insert,
            _ => ChangeType::Update,
        };
        self.stage(collection, record, Some((change, origin)));
        Ok(())
    }

    /// Stages a record without emitting a change event.
    pub(crate) fn put_silent(&mut self, collection: &str, record: Record) {
        self.stage(collection, record, None);
    }

    /// Reads a metadata value.
    pub fn get_local(&self, key: &str) -> Option<i64> {
        match self.staged.locals.get(key) {
            Some(staged) => *staged,
            None => self.base.locals.get(key).copied(),
        }
    }

    /// Sets a metadata value. Committed atomically with the record writes.
    pub fn set_local(&mut self, key: impl Into<String>, value: i64) {
        self.staged.locals.insert(key.into(), Some(value));
    }

    /// Removes a metadata value.
    pub fn remove_local(&mut self, key: impl Into<String>) {
        self.staged.locals.insert(key.into(), None);
    }

    fn stage(&mut self, collection: &str, record: Record, event: Option<(ChangeType, ChangeOrigin)>) {
        let key = (collection.to_string(), record.id.clone());
        // A silent write must not erase an event staged earlier for the record.
        let event = match (event, self.staged.writes.get(&key)) {
            (None, Some(previous)) => previous.event,
            (event, _) => event,
        };
        self.staged.writes.insert(key, StagedWrite { record, event });
    }

    fn base_record(&self, collection: &str, id: &RecordId) -> Option<&Record> {
        self.base.collections.get(collection)?.get(id)
    }

    fn live(&self, collection: &str, id: &RecordId) -> CoreResult<Record> {
        match self.get(collection, id)? {
            None => Err(CoreError::not_found(collection, id.clone())),
            Some(record) if record.deleted => Err(CoreError::RecordDeleted {
                collection: collection.to_string(),
                id: id.clone(),
            }),
            Some(record) => Ok(record),
        }
    }

    fn check_fields(&self, collection: &str, fields: &Fields) -> CoreResult<()> {
        let schema = self.schema.require(collection)?;
        match fields.keys().find(|k| !schema.has_column(k)) {
            Some(field) => Err(CoreError::UnknownField {
                collection: collection.to_string(),
                field: field.clone(),
            }),
            None => Ok(()),
        }
    }
}

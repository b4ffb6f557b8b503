//! Records and their local sync status.

use crate::error::{CoreError, CoreResult};
use crate::schema::CollectionSchema;
use crate::types::{RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// JSON object fields of a record.
pub type Fields = Map<String, Value>;

/// Local sync status of a record.
///
/// Every status except [`SyncStatus::Synced`] means the record belongs to
/// the pending push buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Matches what the server last acknowledged.
    Synced,
    /// Created locally, never pushed.
    Created,
    /// Updated locally since the last push.
    Updated,
    /// Deleted locally, deletion not yet pushed.
    Deleted,
}

impl SyncStatus {
    /// Returns true if the record has local changes waiting for a push.
    pub fn is_pending(self) -> bool {
        self != SyncStatus::Synced
    }
}

/// A record in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable identifier.
    pub id: RecordId,
    /// Column values.
    pub fields: Fields,
    /// Creation time. Never changes after the first write.
    pub created_at: Timestamp,
    /// Last modification time. Never decreases.
    pub updated_at: Timestamp,
    /// Local sync status.
    pub status: SyncStatus,
    /// Columns changed locally since the last push (only for `Updated`).
    pub changed: BTreeSet<String>,
    /// Soft-delete marker. Once set it stays set.
    pub deleted: bool,
    /// Bumped on every local mutation; lets a push acknowledge exactly the
    /// version it sent.
    pub local_version: u64,
}

impl Record {
    /// Creates a record for a local create.
    pub fn new_local(id: RecordId, fields: Fields, now: Timestamp) -> Self {
        Self {
            id,
            fields,
            created_at: now,
            updated_at: now,
            status: SyncStatus::Created,
            changed: BTreeSet::new(),
            deleted: false,
            local_version: 1,
        }
    }

    /// Builds a synced record from a raw remote JSON object.
    ///
    /// The object must carry a non-empty string `id`. `created_at` and
    /// `updated_at` are optional integers (missing means 0). Columns not
    /// declared in `schema` are dropped, as are local bookkeeping keys
    /// such as `_status` and `_changed`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRecord`] if the ID or a timestamp is
    /// malformed.
    pub fn from_raw(raw: &Fields, schema: &CollectionSchema) -> CoreResult<Self> {
        let id = match raw.get("id") {
            Some(Value::String(id)) if !id.is_empty() => RecordId::new(id.clone()),
            Some(other) => {
                return Err(CoreError::invalid_record(format!(
                    "{}: id must be a non-empty string, got {other}",
                    schema.name
                )))
            }
            None => {
                return Err(CoreError::invalid_record(format!(
                    "{}: record without id",
                    schema.name
                )))
            }
        };

        let created_at = raw_timestamp(raw, "created_at", &id)?;
        let updated_at = raw_timestamp(raw, "updated_at", &id)?.max(created_at);

        let fields = raw
            .iter()
            .filter(|(k, _)| schema.has_column(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            id,
            fields,
            created_at,
            updated_at,
            status: SyncStatus::Synced,
            changed: BTreeSet::new(),
            deleted: false,
            local_version: 0,
        })
    }

    /// Renders the record in wire form: `id`, columns, timestamps.
    ///
    /// Local bookkeeping (status, changed columns, versions) is not included.
    pub fn to_raw(&self) -> Fields {
        let mut raw = Map::with_capacity(self.fields.len() + 3);
        raw.insert("id".into(), Value::String(self.id.to_string()));
        for (k, v) in &self.fields {
            raw.insert(k.clone(), v.clone());
        }
        raw.insert("created_at".into(), Value::from(self.created_at.as_millis()));
        raw.insert("updated_at".into(), Value::from(self.updated_at.as_millis()));
        raw
    }

    /// Returns true if the record has changes waiting for a push.
    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    /// Applies a local field update.
    ///
    /// Returns false (and leaves the record untouched) when every value in
    /// `patch` already matches.
    pub fn apply_local_update(&mut self, patch: Fields, now: Timestamp) -> bool {
        let mut touched = false;
        for (key, value) in patch {
            if self.fields.get(&key) == Some(&value) {
                continue;
            }
            if self.status != SyncStatus::Created {
                self.changed.insert(key.clone());
            }
            self.fields.insert(key, value);
            touched = true;
        }

        if touched {
            if self.status == SyncStatus::Synced {
                self.status = SyncStatus::Updated;
            }
            self.touch(now);
        }
        touched
    }

    /// Marks the record deleted by a local action.
    pub fn mark_local_deleted(&mut self, now: Timestamp) {
        self.deleted = true;
        self.status = SyncStatus::Deleted;
        self.changed.clear();
        self.touch(now);
    }

    fn touch(&mut self, now: Timestamp) {
        self.updated_at = self.updated_at.max(now);
        self.local_version += 1;
    }
}

fn raw_timestamp(raw: &Fields, key: &str, id: &RecordId) -> CoreResult<Timestamp> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(Timestamp::from_millis(0)),
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .map(Timestamp::from_millis)
            .ok_or_else(|| {
                CoreError::invalid_record(format!("{id}: {key} must be a number, got {value}"))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn posts() -> CollectionSchema {
        CollectionSchema::new("posts", ["title", "body"])
    }

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn from_raw_sanitizes_columns() {
        let raw = fields(json!({
            "id": "p1",
            "title": "Hi",
            "rogue": true,
            "_status": "created",
            "created_at": 10,
            "updated_at": 20
        }));

        let record = Record::from_raw(&raw, &posts()).unwrap();
        assert_eq!(record.id, RecordId::from("p1"));
        assert_eq!(record.fields, fields(json!({"title": "Hi"})));
        assert_eq!(record.created_at, Timestamp::from_millis(10));
        assert_eq!(record.updated_at, Timestamp::from_millis(20));
        assert_eq!(record.status, SyncStatus::Synced);
        assert!(!record.deleted);
    }

    #[test]
    fn from_raw_requires_string_id() {
        let missing = fields(json!({"title": "x"}));
        assert!(Record::from_raw(&missing, &posts()).is_err());

        let numeric = fields(json!({"id": 7}));
        assert!(Record::from_raw(&numeric, &posts()).is_err());

        let empty = fields(json!({"id": ""}));
        assert!(Record::from_raw(&empty, &posts()).is_err());
    }

    #[test]
    fn from_raw_rejects_bad_timestamp() {
        let raw = fields(json!({"id": "p1", "updated_at": "yesterday"}));
        assert!(matches!(
            Record::from_raw(&raw, &posts()),
            Err(CoreError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn to_raw_omits_bookkeeping() {
        let record = Record::new_local(
            RecordId::from("p1"),
            fields(json!({"title": "Hi"})),
            Timestamp::from_millis(5),
        );
        let raw = record.to_raw();
        assert_eq!(
            Value::Object(raw),
            json!({"id": "p1", "title": "Hi", "created_at": 5, "updated_at": 5})
        );
    }

    #[test]
    fn local_update_of_synced_record_tracks_columns() {
        let raw = fields(json!({"id": "p1", "title": "Hi", "updated_at": 100}));
        let mut record = Record::from_raw(&raw, &posts()).unwrap();

        let touched = record.apply_local_update(
            fields(json!({"title": "Hello", "body": "text"})),
            Timestamp::from_millis(50),
        );

        assert!(touched);
        assert_eq!(record.status, SyncStatus::Updated);
        assert!(record.changed.contains("title"));
        assert!(record.changed.contains("body"));
        // Clock went backwards; updated_at must not.
        assert_eq!(record.updated_at, Timestamp::from_millis(100));
        assert_eq!(record.local_version, 1);
    }

    #[test]
    fn local_update_of_created_record_stays_created() {
        let mut record = Record::new_local(
            RecordId::from("p1"),
            fields(json!({"title": "Hi"})),
            Timestamp::from_millis(1),
        );
        record.apply_local_update(fields(json!({"title": "Yo"})), Timestamp::from_millis(2));

        assert_eq!(record.status, SyncStatus::Created);
        assert!(record.changed.is_empty());
        assert_eq!(record.local_version, 2);
    }

    #[test]
    fn noop_update_is_ignored() {
        let mut record = Record::new_local(
            RecordId::from("p1"),
            fields(json!({"title": "Hi"})),
            Timestamp::from_millis(1),
        );
        assert!(!record.apply_local_update(fields(json!({"title": "Hi"})), Timestamp::from_millis(9)));
        assert_eq!(record.updated_at, Timestamp::from_millis(1));
        assert_eq!(record.local_version, 1);
    }

    #[test]
    fn local_delete_is_pending() {
        let mut record = Record::new_local(
            RecordId::from("p1"),
            Fields::new(),
            Timestamp::from_millis(1),
        );
        record.mark_local_deleted(Timestamp::from_millis(3));

        assert!(record.deleted);
        assert_eq!(record.status, SyncStatus::Deleted);
        assert!(record.is_pending());
        assert_eq!(record.updated_at, Timestamp::from_millis(3));
    }
}

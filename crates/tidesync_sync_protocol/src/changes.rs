//! Change sets exchanged by pull and push.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tidesync_core::{Fields, LocalChanges};

/// A record in wire form: a JSON object with `id`, field columns,
/// `created_at` and `updated_at`.
pub type RawRecord = Fields;

/// Changes of one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionChanges {
    /// Records created since the watermark.
    #[serde(default)]
    pub created: Vec<RawRecord>,
    /// Records updated since the watermark.
    #[serde(default)]
    pub updated: Vec<RawRecord>,
    /// IDs of records deleted since the watermark.
    #[serde(default)]
    pub deleted: Vec<String>,
}

impl CollectionChanges {
    /// Returns true if all buckets are empty.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total entries across buckets.
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }
}

/// Per-collection created/updated/deleted buckets.
///
/// Serialized as a JSON object keyed by collection name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet {
    collections: BTreeMap<String, CollectionChanges>,
}

impl ChangeSet {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the outgoing change set of a push from pending local changes.
    ///
    /// Created and updated records are sent whole; deleted records are sent
    /// by ID. Each record lands in the bucket of its sync status, so no ID
    /// appears twice.
    pub fn from_local(local: &LocalChanges) -> Self {
        let collections = local
            .collections
            .iter()
            .map(|(name, changes)| {
                let wire = CollectionChanges {
                    created: changes.created.iter().map(|r| r.to_raw()).collect(),
                    updated: changes.updated.iter().map(|r| r.to_raw()).collect(),
                    deleted: changes.deleted.iter().map(|r| r.id.to_string()).collect(),
                };
                (name.clone(), wire)
            })
            .collect();
        Self { collections }
    }

    /// Returns true if no collection carries a change.
    pub fn is_empty(&self) -> bool {
        self.collections.values().all(CollectionChanges::is_empty)
    }

    /// Total entries across collections and buckets.
    pub fn len(&self) -> usize {
        self.collections.values().map(CollectionChanges::len).sum()
    }

    /// Returns the changes of one collection.
    pub fn collection(&self, name: &str) -> Option<&CollectionChanges> {
        self.collections.get(name)
    }

    /// Returns the changes of one collection, inserting an empty entry.
    pub fn collection_mut(&mut self, name: &str) -> &mut CollectionChanges {
        self.collections.entry(name.to_string()).or_default()
    }

    /// Iterates collections in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CollectionChanges)> {
        self.collections.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Checks that every record has a non-empty string `id` and that no ID
    /// appears in more than one bucket of its collection.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidChangeSet`] naming the first offender.
    pub fn validate(&self) -> ProtocolResult<()> {
        for (name, changes) in &self.collections {
            let mut seen = HashSet::new();
            let upserts = changes.created.iter().chain(&changes.updated);
            for record in upserts {
                let id = raw_id(record).ok_or_else(|| {
                    ProtocolError::invalid_change_set(format!("{name}: record without string id"))
                })?;
                if !seen.insert(id.to_string()) {
                    return Err(ProtocolError::invalid_change_set(format!(
                        "{name}: id {id} appears twice"
                    )));
                }
            }
            for id in &changes.deleted {
                if id.is_empty() || !seen.insert(id.clone()) {
                    return Err(ProtocolError::invalid_change_set(format!(
                        "{name}: bad or repeated deleted id {id:?}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Returns the `id` of a raw record if it is a non-empty string.
pub fn raw_id(record: &RawRecord) -> Option<&str> {
    match record.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Some(id.as_str()),
        _ => None,
    }
}

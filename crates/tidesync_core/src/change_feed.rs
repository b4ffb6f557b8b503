//! Change feed for observing committed record changes.
//!
//! The change feed emits events for all committed record changes, enabling:
//! - Reactive UI updates
//! - Triggering a sync after local edits
//! - Audit logging
//!
//! # Usage
//!
//! ```rust
//! use tidesync_core::{RecordStore, Schema};
//! use serde_json::json;
//!
//! let store = RecordStore::in_memory(Schema::app_default());
//! let receiver = store.subscribe();
//!
//! let fields = json!({"title": "Hi"}).as_object().cloned().unwrap();
//! store.create("posts", fields).unwrap();
//!
//! let event = receiver.try_recv().unwrap();
//! assert_eq!(event.collection, "posts");
//! ```

use crate::types::{RecordId, SequenceNumber};
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// Type of change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// Record appeared (no previous version existed).
    Insert,
    /// Record fields or status changed.
    Update,
    /// Record became soft-deleted.
    Delete,
}

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// A local user mutation.
    Local,
    /// A remote delta applied by sync.
    Remote,
}

/// A single change event from the change feed.
///
/// Change events are emitted only after a transaction commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Sequence number of the commit.
    pub sequence: SequenceNumber,
    /// Collection name.
    pub collection: String,
    /// Changed record.
    pub record_id: RecordId,
    /// Type of change.
    pub change_type: ChangeType,
    /// Who made the change.
    pub origin: ChangeOrigin,
}

/// A change feed that distributes committed changes to subscribers.
///
/// The change feed:
/// - Emits only committed changes
/// - Preserves commit order
/// - Supports multiple subscribers
/// - Is thread-safe
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
    history: RwLock<Vec<ChangeEvent>>,
    max_history: usize,
}

impl ChangeFeed {
    /// Creates a new change feed.
    pub fn new() -> Self {
        Self::with_max_history(10_000)
    }

    /// Creates a change feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Subscribes to the change feed.
    ///
    /// Returns a receiver that will receive all future change events.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits the events of one commit to all subscribers.
    pub fn emit_batch(&self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }

        {
            let mut history = self.history.write();
            history.extend(events.iter().cloned());
            if history.len() > self.max_history {
                let to_remove = history.len() - self.max_history;
                history.drain(0..to_remove);
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| events.iter().all(|e| tx.send(e.clone()).is_ok()));
    }

    /// Polls events committed after `cursor`, up to `limit`.
    pub fn poll(&self, cursor: SequenceNumber, limit: usize) -> Vec<ChangeEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns the number of events in history.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

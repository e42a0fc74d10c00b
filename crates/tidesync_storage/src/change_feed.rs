//! Change feed for observing committed writes.
//!
//! Every write committed by [`crate::InMemoryStorage`] is published here,
//! tagged with the [`OwnerToken`] of the component that issued it. The sync
//! core uses the tag to recognise echoes of its own writes, while
//! application-originated writes arrive untagged.
//!
//! # Usage
//!
//! ```rust
//! use serde_json::json;
//! use tidesync_storage::{InMemoryStorage, ModelDefinition, OwnerToken, Record, Storage};
//!
//! let storage = InMemoryStorage::new();
//! let changes = storage.changes().subscribe();
//! let me = OwnerToken::new();
//!
//! let todo = ModelDefinition::new("Todo");
//! storage
//!     .save(&todo, Record::new().with_field("id", json!("t1")), None, Some(&me))
//!     .unwrap();
//!
//! let change = changes.recv().unwrap();
//! assert!(change.is_from(&me));
//! ```

use crate::record::Record;
use crate::storage::{OpType, OwnerToken};
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// A single committed write.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    /// Commit sequence number, increasing across all tables.
    pub sequence: u64,
    /// Model (table) name.
    pub model: String,
    /// What happened to the record.
    pub change_type: OpType,
    /// The record as written, or as it was before deletion.
    pub record: Record,
    /// Token of the component that issued the write.
    pub owner: Option<OwnerToken>,
}

impl StorageChange {
    /// Returns true if the write was issued by `owner`.
    pub fn is_from(&self, owner: &OwnerToken) -> bool {
        self.owner.as_ref() == Some(owner)
    }
}

/// Distributes committed writes to subscribers.
///
/// The change feed:
/// - Emits only committed writes, in commit order
/// - Supports multiple subscribers
/// - Keeps a bounded history for cursor-based polling
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<StorageChange>>>,
    history: RwLock<Vec<StorageChange>>,
    max_history: usize,
}

impl ChangeFeed {
    /// Creates a change feed with the default history limit.
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

    /// Subscribes to all future changes.
    pub fn subscribe(&self) -> Receiver<StorageChange> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Publishes a change to history and to every live subscriber.
    pub fn emit(&self, change: StorageChange) {
        {
            let mut history = self.history.write();
            history.push(change.clone());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(0..excess);
            }
        }

        // Disconnected receivers are dropped here.
        self.subscribers
            .write()
            .retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Returns up to `limit` changes with sequence greater than `cursor`.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<StorageChange> {
        self.history
            .read()
            .iter()
            .filter(|c| c.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Latest sequence in history, or 0.
    pub fn latest_sequence(&self) -> u64 {
        self.history.read().last().map_or(0, |c| c.sequence)
    }

    /// Number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

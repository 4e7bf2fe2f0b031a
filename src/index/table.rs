//! Index implementation
//!
//! BTreeMap-based index with RwLock for concurrency.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;

use crate::error::{KeelError, Result};
use crate::wal::{Operation, Record, SnapshotEntry};

use super::IndexEntry;

/// Live keys and their current values
pub struct Index<V> {
    entries: RwLock<BTreeMap<String, IndexEntry<V>>>,
}

impl<V: Clone> Index<V> {
    /// Create a new empty index
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Current value for `key` (read lock)
    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.read().get(key).map(|e| e.value.clone())
    }

    /// Current entry for `key`, including its sequence
    pub fn entry(&self, key: &str) -> Option<IndexEntry<V>> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Insert or replace an entry (write lock)
    pub fn insert(&self, key: String, entry: IndexEntry<V>) {
        self.entries.write().insert(key, entry);
    }

    /// Remove an entry (write lock)
    pub fn remove(&self, key: &str) -> Option<IndexEntry<V>> {
        self.entries.write().remove(key)
    }

    /// All live keys in ascending order
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Point-in-time copy in snapshot form (value bytes are shared, not copied)
    pub fn snapshot_entries(&self) -> Vec<SnapshotEntry> {
        self.entries
            .read()
            .iter()
            .map(|(key, entry)| SnapshotEntry {
                key: key.clone(),
                sequence: entry.sequence,
                value: entry.encoded.clone(),
            })
            .collect()
    }
}

impl<V: Clone + DeserializeOwned> Index<V> {
    /// Fold one replayed record into the index
    pub fn apply(&self, record: Record) -> Result<()> {
        match record.operation {
            Operation::Put => {
                let encoded = record.value.ok_or_else(|| {
                    KeelError::Serialization(format!(
                        "put record {} for {:?} has no value",
                        record.sequence, record.key
                    ))
                })?;
                let value = bincode::deserialize(&encoded).map_err(|e| {
                    KeelError::Serialization(format!(
                        "cannot decode value of {:?} at sequence {}: {}",
                        record.key, record.sequence, e
                    ))
                })?;
                self.insert(
                    record.key,
                    IndexEntry {
                        value,
                        encoded,
                        sequence: record.sequence,
                    },
                );
            }
            Operation::Delete => {
                self.remove(&record.key);
            }
        }
        Ok(())
    }
}

impl<V: Clone> Default for Index<V> {
    fn default() -> Self {
        Self::new()
    }
}

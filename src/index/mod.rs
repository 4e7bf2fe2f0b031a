//! Index Module
//!
//! In-memory map from key to its current value. It is a cache of durable
//! state: everything in it was appended to the log first, and it can always
//! be rebuilt by replay.
//!
//! ## Data Structure Choice
//! BTreeMap wrapped in RwLock:
//! - `list_keys` returns keys in ascending byte order
//! - Readers share the lock; entries are swapped in whole, so a reader sees
//!   either the old or the new entry, never a mix

mod table;

use bytes::Bytes;

pub use table::Index;

/// Entry stored in the index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry<V> {
    /// Decoded value handed to readers
    pub value: V,

    /// Encoded form as it was logged, reused by compaction
    pub encoded: Bytes,

    /// Sequence of the Put record that produced this entry
    pub sequence: u64,
}

//! Error types for KeelKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using KeelError
pub type Result<T> = std::result::Result<T, KeelError>;

/// Unified error type for KeelKV operations
#[derive(Debug, Error)]
pub enum KeelError {
    // -------------------------------------------------------------------------
    // Key Precondition Errors
    // -------------------------------------------------------------------------
    #[error("Key already exists: {key:?}")]
    KeyExists { key: String },

    #[error("Key not found: {key:?}")]
    KeyNotFound { key: String },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The encoded record would not fit in a single log frame.
    #[error("Record for key {key:?} is {size} bytes, larger than the {max} byte frame limit")]
    RecordTooLarge { key: String, size: usize, max: u32 },

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The durable append of `sequence` failed; the sequence was not consumed.
    #[error("Append of sequence {sequence} (key {key:?}) failed: {source}")]
    Append {
        key: String,
        sequence: u64,
        #[source]
        source: std::io::Error,
    },

    /// A failed append could not be rolled back, so the log tail is unknown.
    #[error("Log is unwritable after failed append of sequence {sequence}; reopen the store")]
    LogUnwritable { sequence: u64 },

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    #[error("Log corruption at offset {offset} (last good sequence {last_sequence}): {reason}")]
    CorruptLog {
        offset: u64,
        last_sequence: u64,
        reason: String,
    },

    #[error("Snapshot corruption detected: {0}")]
    CorruptSnapshot(String),

    #[error("Snapshot at sequence {snapshot} is ahead of the log (last sequence {last})")]
    SnapshotAhead { snapshot: u64, last: u64 },

    #[error("Snapshot at sequence {snapshot} is older than the installed one ({installed})")]
    SnapshotBehind { snapshot: u64, installed: u64 },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl KeelError {
    /// True for `KeyNotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, KeelError::KeyNotFound { .. })
    }

    /// True for `KeyExists`
    pub fn is_exists(&self) -> bool {
        matches!(self, KeelError::KeyExists { .. })
    }

    /// Integrity violations that need operator attention rather than a retry
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KeelError::CorruptLog { .. }
                | KeelError::CorruptSnapshot(_)
                | KeelError::LogUnwritable { .. }
        )
    }
}

impl From<bincode::Error> for KeelError {
    fn from(e: bincode::Error) -> Self {
        KeelError::Serialization(e.to_string())
    }
}

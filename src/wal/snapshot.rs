//! Snapshot files
//!
//! A snapshot is a self-contained copy of the index as of one sequence
//! number. It is written to a temp file, fsynced, then renamed into place so
//! the `snapshot` path always names a complete file.
//!
//! ## File Format
//! ```text
//! ┌──────────┬───────────┬───────────────┬─────────┬──────────────────┐
//! │Magic (4) │Version (2)│Payload Len (8)│ CRC (4) │ bincode payload  │
//! └──────────┴───────────┴───────────────┴─────────┴──────────────────┘
//! ```

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{KeelError, Result};

use super::{Operation, Record};

pub const SNAPSHOT_FILENAME: &str = "snapshot";
pub const SNAPSHOT_TEMP_FILENAME: &str = "snapshot.tmp";

const MAGIC: &[u8; 4] = b"KSNP";
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 4 + 2 + 8 + 4;

/// Compacted index contents as of `sequence`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Every record at or below this sequence is reflected here
    pub sequence: u64,
    pub entries: Vec<SnapshotEntry>,
}

/// One live key in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: String,
    /// Sequence of the Put that produced this value
    pub sequence: u64,
    pub value: Bytes,
}

impl Snapshot {
    pub fn new(sequence: u64, entries: Vec<SnapshotEntry>) -> Self {
        Self { sequence, entries }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(KeelError::CorruptSnapshot(format!(
                "file is {} bytes, shorter than its header",
                data.len()
            )));
        }
        if &data[0..4] != MAGIC {
            return Err(KeelError::CorruptSnapshot(format!(
                "invalid magic: expected KSNP, got {:?}",
                &data[0..4]
            )));
        }

        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != VERSION {
            return Err(KeelError::CorruptSnapshot(format!(
                "unsupported snapshot version: {}",
                version
            )));
        }

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&data[6..14]);
        let payload_len = u64::from_le_bytes(len_bytes);
        let stored_crc = u32::from_le_bytes([data[14], data[15], data[16], data[17]]);

        let payload = &data[HEADER_SIZE..];
        if payload.len() as u64 != payload_len {
            return Err(KeelError::CorruptSnapshot(format!(
                "payload is {} bytes, header says {}",
                payload.len(),
                payload_len
            )));
        }
        if crc32fast::hash(payload) != stored_crc {
            return Err(KeelError::CorruptSnapshot("checksum mismatch".to_string()));
        }

        bincode::deserialize(payload).map_err(|e| KeelError::CorruptSnapshot(e.to_string()))
    }

    /// Load the installed snapshot from `dir`, if there is one
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        match fs::read(dir.join(SNAPSHOT_FILENAME)) {
            Ok(data) => Self::decode(&data).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write this snapshot to the temp path and fsync it, without installing it
    pub fn write_temp(&self, dir: &Path) -> Result<PendingSnapshot> {
        let temp_path = dir.join(SNAPSHOT_TEMP_FILENAME);
        let data = self.encode()?;

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;

        Ok(PendingSnapshot {
            temp_path,
            sequence: self.sequence,
            entries: self.entries.len(),
            bytes: data.len() as u64,
        })
    }

    /// Entries as Put records in sequence order
    pub fn into_records(self) -> Vec<Record> {
        let mut records: Vec<Record> = self
            .entries
            .into_iter()
            .map(|entry| Record {
                sequence: entry.sequence,
                operation: Operation::Put,
                key: entry.key,
                value: Some(entry.value),
            })
            .collect();
        records.sort_by_key(|r| r.sequence);
        records
    }
}

/// A fully written snapshot that has not yet replaced the installed one
#[derive(Debug)]
pub struct PendingSnapshot {
    temp_path: PathBuf,
    sequence: u64,
    entries: usize,
    bytes: u64,
}

impl PendingSnapshot {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Atomically make this the installed snapshot
    pub(crate) fn install(self, dir: &Path) -> Result<()> {
        fs::rename(&self.temp_path, dir.join(SNAPSHOT_FILENAME))?;
        super::sync_dir(dir)
    }

    /// Throw the temp file away
    pub(crate) fn discard(self) {
        if let Err(e) = fs::remove_file(&self.temp_path) {
            tracing::warn!(path = %self.temp_path.display(), error = %e, "failed to remove snapshot temp file");
        }
    }
}

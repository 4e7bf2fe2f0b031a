//! Log Recovery
//!
//! Validates the on-disk state on open and cuts off a torn tail so new
//! appends always land on a frame boundary.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;

use crate::error::Result;

use super::snapshot::SNAPSHOT_TEMP_FILENAME;
use super::{LogReader, Snapshot, LOG_FILENAME, LOG_TEMP_FILENAME};

/// Result of a recovery or verification pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Sequence the installed snapshot reflects (0 without a snapshot)
    pub snapshot_sequence: u64,

    /// Number of live keys in the snapshot
    pub snapshot_entries: u64,

    /// Well-formed records in the log
    pub log_records: u64,

    /// Log records already covered by the snapshot
    pub stale_records: u64,

    /// Highest sequence reflected anywhere on disk
    pub last_sequence: u64,

    /// Length of the well-formed log prefix
    pub valid_bytes: u64,

    /// Bytes of torn tail after the well-formed prefix
    pub torn_bytes: u64,
}

impl RecoveryReport {
    /// Whether a partial write was found at the log tail
    pub fn was_truncated(&self) -> bool {
        self.torn_bytes > 0
    }

    /// Log records that replay will apply on top of the snapshot
    pub fn tail_records(&self) -> u64 {
        self.log_records - self.stale_records
    }
}

/// Handles recovery after a crash
pub struct LogRecovery;

impl LogRecovery {
    /// Recover the store directory
    ///
    /// This will:
    /// 1. Load and check the installed snapshot
    /// 2. Scan the log, failing on mid-log corruption
    /// 3. Truncate a torn tail
    /// 4. Remove temp files left by an interrupted compaction
    pub fn recover(dir: &Path) -> Result<RecoveryReport> {
        let report = Self::verify(dir)?;

        if report.was_truncated() {
            let file = OpenOptions::new().write(true).open(dir.join(LOG_FILENAME))?;
            file.set_len(report.valid_bytes)?;
            file.sync_all()?;
            tracing::warn!(
                valid_bytes = report.valid_bytes,
                torn_bytes = report.torn_bytes,
                "truncated torn tail from log"
            );
        }

        for name in [SNAPSHOT_TEMP_FILENAME, LOG_TEMP_FILENAME] {
            match fs::remove_file(dir.join(name)) {
                Ok(()) => tracing::info!(file = name, "removed leftover compaction temp file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(report)
    }

    /// Check integrity of a store directory without modifying it
    pub fn verify(dir: &Path) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        if let Some(snapshot) = Snapshot::load(dir)? {
            report.snapshot_sequence = snapshot.sequence;
            report.snapshot_entries = snapshot.entries.len() as u64;
        }

        let log_path = dir.join(LOG_FILENAME);
        let mut log_last_sequence = 0;
        if log_path.exists() {
            let mut reader = LogReader::open(&log_path)?;
            for record in reader.by_ref() {
                let record = record?;
                report.log_records += 1;
                if record.sequence <= report.snapshot_sequence {
                    report.stale_records += 1;
                }
            }
            log_last_sequence = reader.last_sequence();
            report.valid_bytes = reader.valid_len();
            report.torn_bytes = reader.file_len() - reader.valid_len();
        }

        report.last_sequence = report.snapshot_sequence.max(log_last_sequence);
        Ok(report)
    }
}

//! Log Store
//!
//! Owns the store directory: the append handle on `log`, the installed
//! `snapshot`, and the compaction protocol that moves history from one to
//! the other.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{KeelError, Result};

use super::{
    sync_dir, LogReader, LogRecovery, LogWriter, PendingSnapshot, Record, RecoveryReport, Replay,
    Snapshot, SnapshotEntry, LOG_FILENAME, LOG_TEMP_FILENAME,
};

/// What a compaction did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Sequence the new snapshot reflects
    pub sequence: u64,
    /// Live keys written to the snapshot
    pub entries: u64,
    /// Size of the snapshot file
    pub snapshot_bytes: u64,
    /// Log records dropped because the snapshot covers them
    pub retired_records: u64,
}

/// The durable log store
///
/// ## Durability:
/// - `append` returns only after the frame is fsynced
/// - `install_snapshot` renames the snapshot into place before touching the
///   log, so a crash at any point leaves either the old snapshot + full log or
///   the new snapshot + a log whose covered records replay skips
pub struct LogStore {
    dir: PathBuf,
    writer: LogWriter,
    /// Sequence of the installed snapshot (0 if none)
    snapshot_sequence: u64,
    /// Log records newer than the installed snapshot
    tail_records: u64,
    recovery: RecoveryReport,
}

impl LogStore {
    /// Open the store directory, recovering from any interrupted write
    ///
    /// The directory must exist. Fails with `CorruptLog` or `CorruptSnapshot`
    /// if integrity cannot be established.
    pub fn open(dir: &Path) -> Result<Self> {
        let recovery = LogRecovery::recover(dir)?;
        let writer = LogWriter::open(&dir.join(LOG_FILENAME), recovery.last_sequence + 1)?;

        tracing::info!(
            dir = %dir.display(),
            snapshot_sequence = recovery.snapshot_sequence,
            tail_records = recovery.tail_records(),
            last_sequence = recovery.last_sequence,
            "opened log store"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            writer,
            snapshot_sequence: recovery.snapshot_sequence,
            tail_records: recovery.tail_records(),
            recovery,
        })
    }

    /// Durably append a record and return its sequence number
    pub fn append(&mut self, record: Record) -> Result<u64> {
        let sequence = self.writer.append(record)?;
        self.tail_records += 1;
        Ok(sequence)
    }

    /// Start a fresh pass over snapshot + log tail
    pub fn replay(&self) -> Result<Replay> {
        let (sequence, records) = match Snapshot::load(&self.dir)? {
            Some(snapshot) => (snapshot.sequence, snapshot.into_records()),
            None => (0, Vec::new()),
        };
        let log = LogReader::open(self.writer.path())?;
        Ok(Replay::new(sequence, records, Some(log)))
    }

    /// Snapshot `entries` as of `up_to_sequence` and retire the covered log records
    pub fn compact(
        &mut self,
        entries: Vec<SnapshotEntry>,
        up_to_sequence: u64,
    ) -> Result<CompactionStats> {
        let pending = Self::write_snapshot(&self.dir, Snapshot::new(up_to_sequence, entries))?;
        self.install_snapshot(pending)
    }

    /// First compaction phase: write the snapshot temp file
    ///
    /// Needs no access to the log, so callers can run it without holding
    /// whatever serializes appends.
    pub fn write_snapshot(dir: &Path, snapshot: Snapshot) -> Result<PendingSnapshot> {
        let pending = snapshot.write_temp(dir)?;
        tracing::debug!(
            sequence = pending.sequence(),
            entries = pending.entries(),
            bytes = pending.bytes(),
            "wrote pending snapshot"
        );
        Ok(pending)
    }

    /// Second compaction phase: switch the snapshot pointer and retire old log records
    pub fn install_snapshot(&mut self, pending: PendingSnapshot) -> Result<CompactionStats> {
        if let Err(e) = self.check_installable(&pending) {
            pending.discard();
            return Err(e);
        }

        let stats = CompactionStats {
            sequence: pending.sequence(),
            entries: pending.entries() as u64,
            snapshot_bytes: pending.bytes(),
            retired_records: 0,
        };

        pending.install(&self.dir)?;
        self.snapshot_sequence = stats.sequence;

        let retired_records = self.retire_log(stats.sequence)?;

        tracing::info!(
            sequence = stats.sequence,
            entries = stats.entries,
            retired_records,
            tail_records = self.tail_records,
            "installed snapshot"
        );

        Ok(CompactionStats {
            retired_records,
            ..stats
        })
    }

    fn check_installable(&self, pending: &PendingSnapshot) -> Result<()> {
        if self.writer.is_poisoned() {
            return Err(KeelError::LogUnwritable {
                sequence: self.writer.next_sequence(),
            });
        }
        if pending.sequence() > self.last_sequence() {
            return Err(KeelError::SnapshotAhead {
                snapshot: pending.sequence(),
                last: self.last_sequence(),
            });
        }
        if pending.sequence() < self.snapshot_sequence {
            return Err(KeelError::SnapshotBehind {
                snapshot: pending.sequence(),
                installed: self.snapshot_sequence,
            });
        }
        Ok(())
    }

    /// Rewrite the log keeping only records above `up_to_sequence`
    fn retire_log(&mut self, up_to_sequence: u64) -> Result<u64> {
        let log_path = self.dir.join(LOG_FILENAME);
        let temp_path = self.dir.join(LOG_TEMP_FILENAME);

        let (kept, retired) = match Self::write_log_tail(&log_path, &temp_path, up_to_sequence) {
            Ok(counts) => counts,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(e);
            }
        };

        // From the rename on, the old handle may point at a replaced file, so
        // every failure poisons the writer instead of leaving it appendable.
        match self.swap_log(&temp_path, &log_path) {
            Ok(writer) => self.writer = writer,
            Err(e) => {
                self.writer.poison();
                tracing::error!(error = %e, "log swap failed, refusing further appends");
                return Err(e);
            }
        }
        self.tail_records = kept;

        Ok(retired)
    }

    /// Move the rewritten log into place and open an append handle on it
    fn swap_log(&self, temp_path: &Path, log_path: &Path) -> Result<LogWriter> {
        fs::rename(temp_path, log_path)?;
        sync_dir(&self.dir)?;
        LogWriter::open(log_path, self.writer.next_sequence())
    }

    fn write_log_tail(log_path: &Path, temp_path: &Path, up_to_sequence: u64) -> Result<(u64, u64)> {
        let mut out = BufWriter::new(File::create(temp_path)?);
        let (mut kept, mut retired) = (0u64, 0u64);

        for record in LogReader::open(log_path)? {
            let record = record?;
            if record.sequence > up_to_sequence {
                out.write_all(&record.encode())?;
                kept += 1;
            } else {
                retired += 1;
            }
        }

        let file = out.into_inner().map_err(|e| KeelError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok((kept, retired))
    }

    /// Flush and release the log handle
    pub fn close(mut self) -> Result<()> {
        self.writer.sync()?;
        tracing::info!(
            dir = %self.dir.display(),
            last_sequence = self.last_sequence(),
            "closed log store"
        );
        Ok(())
    }

    /// Force the log to stable storage
    pub fn sync(&mut self) -> Result<()> {
        self.writer.sync()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sequence of the most recent durable record (0 if none)
    pub fn last_sequence(&self) -> u64 {
        self.writer.last_sequence()
    }

    pub fn next_sequence(&self) -> u64 {
        self.writer.next_sequence()
    }

    pub fn snapshot_sequence(&self) -> u64 {
        self.snapshot_sequence
    }

    /// Log records not yet folded into a snapshot
    pub fn tail_records(&self) -> u64 {
        self.tail_records
    }

    /// Bytes of well-formed log on disk
    pub fn log_bytes(&self) -> u64 {
        self.writer.offset()
    }

    /// What recovery found when this store was opened
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }
}

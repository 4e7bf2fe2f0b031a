//! Replay
//!
//! Lazy reconstruction stream: snapshot entries first, then the log records
//! the snapshot does not already cover.

use std::vec;

use crate::error::Result;

use super::{LogReader, Record, TailState};

/// Ordered, finite stream of records to fold into a fresh index
///
/// Obtained from `LogStore::replay()`; each call starts a new pass over the
/// files on disk.
pub struct Replay {
    snapshot: vec::IntoIter<Record>,
    log: Option<LogReader>,
    /// Log records at or below this sequence are already in the snapshot
    floor: u64,
    skipped: u64,
    from_snapshot: u64,
    from_log: u64,
}

/// Counters describing a completed replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub snapshot_sequence: u64,
    pub snapshot_records: u64,
    pub log_records: u64,
    pub skipped_records: u64,
}

impl Replay {
    pub(crate) fn new(snapshot_sequence: u64, snapshot: Vec<Record>, log: Option<LogReader>) -> Self {
        Self {
            snapshot: snapshot.into_iter(),
            log,
            floor: snapshot_sequence,
            skipped: 0,
            from_snapshot: 0,
            from_log: 0,
        }
    }

    pub fn stats(&self) -> ReplayStats {
        ReplayStats {
            snapshot_sequence: self.floor,
            snapshot_records: self.from_snapshot,
            log_records: self.from_log,
            skipped_records: self.skipped,
        }
    }

    /// How the log part of the replay ended (`None` if there is no log file)
    pub fn tail_state(&self) -> Option<TailState> {
        self.log.as_ref().map(LogReader::tail_state)
    }
}

impl Iterator for Replay {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(record) = self.snapshot.next() {
            self.from_snapshot += 1;
            return Some(Ok(record));
        }

        let log = self.log.as_mut()?;
        loop {
            match log.next()? {
                Ok(record) if record.sequence <= self.floor => self.skipped += 1,
                Ok(record) => {
                    self.from_log += 1;
                    return Some(Ok(record));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

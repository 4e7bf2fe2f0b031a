//! Log Writer
//!
//! Handles durable appends to the record log.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{KeelError, Result};

use super::Record;

/// Appends frames to the log file, fsyncing each one before returning
///
/// The writer assumes the file ends on a frame boundary; recovery truncates
/// any torn tail before a writer is opened.
pub struct LogWriter {
    path: PathBuf,
    file: File,
    /// Length of the durable, well-formed prefix of the file
    offset: u64,
    /// Sequence number the next append will receive
    next_sequence: u64,
    /// Set when a failed append could not be rolled back
    poisoned: Option<u64>,
}

impl LogWriter {
    /// Open or create a log file positioned at its end
    pub fn open(path: &Path, next_sequence: u64) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        let offset = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            offset,
            next_sequence: next_sequence.max(1),
            poisoned: None,
        })
    }

    /// Append a record, assigning it the next sequence number
    ///
    /// On failure the partial frame is cut off again and the sequence counter
    /// stays where it was.
    pub fn append(&mut self, record: Record) -> Result<u64> {
        if let Some(sequence) = self.poisoned {
            return Err(KeelError::LogUnwritable { sequence });
        }
        record.validate()?;

        let sequence = self.next_sequence;
        let record = record.with_sequence(sequence);
        let frame = record.encode();

        if let Err(source) = self.write_frame(&frame) {
            if let Err(rollback) = self.rollback() {
                tracing::error!(
                    sequence,
                    error = %rollback,
                    "failed to roll back partial append, log is now unwritable"
                );
                self.poisoned = Some(sequence);
            }
            return Err(KeelError::Append {
                key: record.key,
                sequence,
                source,
            });
        }

        self.offset += frame.len() as u64;
        self.next_sequence += 1;

        tracing::debug!(sequence, key = %record.key, bytes = frame.len(), "appended record");
        Ok(sequence)
    }

    fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        self.file.write_all(frame)?;
        self.file.sync_data()
    }

    /// Cut the file back to the last durable frame boundary
    fn rollback(&mut self) -> std::io::Result<()> {
        self.file.set_len(self.offset)?;
        self.file.seek(SeekFrom::Start(self.offset))?;
        self.file.sync_data()
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Sequence number the next append will receive
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Sequence number of the most recent append (0 if none ever happened)
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    /// Bytes of well-formed log on disk
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Refuse all further appends
    pub(crate) fn poison(&mut self) {
        self.poisoned.get_or_insert(self.next_sequence);
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }
}

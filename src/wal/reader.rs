//! Log Reader
//!
//! Streams records out of the log file and classifies any bad frame as
//! either a torn tail (crash mid-append) or mid-log corruption.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::{KeelError, Result};

use super::record::{FrameError, HEADER_SIZE, Record};

/// How reading ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    /// Still reading
    Pending,
    /// Reached end of file on a frame boundary
    Clean,
    /// Stopped at an interrupted write starting at `offset`
    Torn { offset: u64 },
    /// Stopped at a corrupt frame starting at `offset`
    Corrupt { offset: u64 },
}

/// Reads records from the log file in order
///
/// Iteration yields `Ok(record)` for every well-formed frame, stops quietly at
/// a torn tail, and yields a single `Err(CorruptLog)` if a bad frame is
/// followed by more data.
pub struct LogReader {
    reader: BufReader<File>,
    file_len: u64,
    /// Offset of the next frame to read
    offset: u64,
    last_sequence: u64,
    records_read: u64,
    tail: TailState,
}

impl LogReader {
    /// Open a log file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();

        Ok(Self {
            reader: BufReader::new(file),
            file_len,
            offset: 0,
            last_sequence: 0,
            records_read: 0,
            tail: TailState::Pending,
        })
    }

    /// Read the next record
    ///
    /// Returns `Ok(None)` at end of file or at a torn tail.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        if self.tail != TailState::Pending {
            return Ok(None);
        }
        if self.offset >= self.file_len {
            self.tail = TailState::Clean;
            return Ok(None);
        }

        let frame_start = self.offset;

        let mut header = [0u8; HEADER_SIZE];
        let got = read_full(&mut self.reader, &mut header)?;
        if got < HEADER_SIZE {
            return Ok(self.torn(frame_start));
        }

        let body_len = match Record::body_len(&header) {
            Ok(len) => len,
            Err(FrameError::Malformed(reason)) => {
                // Judged as a header-only frame.
                let header_end = frame_start + HEADER_SIZE as u64;
                let zero = is_zero(&header);
                return self.malformed(frame_start, header_end, zero, reason);
            }
            Err(FrameError::Incomplete) => return Ok(self.torn(frame_start)),
        };

        let mut body = vec![0u8; body_len];
        let got = read_full(&mut self.reader, &mut body)?;
        if got < body_len {
            return Ok(self.torn(frame_start));
        }

        let frame_end = frame_start + (HEADER_SIZE + body_len) as u64;

        let record = match Record::decode_body(&header, &body) {
            Ok(record) => record,
            Err(FrameError::Malformed(reason)) => {
                let zero = is_zero(&header) && is_zero(&body);
                return self.malformed(frame_start, frame_end, zero, reason);
            }
            Err(FrameError::Incomplete) => return Ok(self.torn(frame_start)),
        };

        if record.sequence <= self.last_sequence {
            return Err(self.corrupt(
                frame_start,
                format!(
                    "sequence {} does not follow {}",
                    record.sequence, self.last_sequence
                ),
            ));
        }

        self.offset = frame_end;
        self.last_sequence = record.sequence;
        self.records_read += 1;
        Ok(Some(record))
    }

    fn torn(&mut self, frame_start: u64) -> Option<Record> {
        tracing::warn!(
            offset = frame_start,
            bytes = self.file_len - frame_start,
            last_sequence = self.last_sequence,
            "torn write at log tail"
        );
        self.tail = TailState::Torn { offset: frame_start };
        None
    }

    /// A complete but invalid frame is only forgiven as the final frame of the
    /// file, or when everything from it to end of file is zero fill.
    fn malformed(
        &mut self,
        frame_start: u64,
        frame_end: u64,
        read_so_far_is_zero: bool,
        reason: String,
    ) -> Result<Option<Record>> {
        let is_last_frame = frame_end >= self.file_len;
        if is_last_frame || (read_so_far_is_zero && self.rest_is_zero()?) {
            return Ok(self.torn(frame_start));
        }
        Err(self.corrupt(frame_start, reason))
    }

    /// Drain the reader, checking that every remaining byte is zero
    fn rest_is_zero(&mut self) -> Result<bool> {
        let mut buf = [0u8; 8192];
        loop {
            let got = read_full(&mut self.reader, &mut buf)?;
            if !is_zero(&buf[..got]) {
                return Ok(false);
            }
            if got < buf.len() {
                return Ok(true);
            }
        }
    }

    fn corrupt(&mut self, frame_start: u64, reason: String) -> KeelError {
        tracing::error!(
            offset = frame_start,
            last_sequence = self.last_sequence,
            %reason,
            "log corruption detected"
        );
        self.tail = TailState::Corrupt { offset: frame_start };
        KeelError::CorruptLog {
            offset: frame_start,
            last_sequence: self.last_sequence,
            reason,
        }
    }

    /// Sequence of the last well-formed record read
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Number of well-formed records read so far
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// End of the well-formed prefix read so far
    pub fn valid_len(&self) -> u64 {
        self.offset
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    pub fn tail_state(&self) -> TailState {
        self.tail
    }
}

impl Iterator for LogReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

fn is_zero(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}

/// Read until `buf` is full or EOF, returning the byte count
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

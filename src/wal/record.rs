//! Log record definitions
//!
//! Defines the structure of individual log records and their frame encoding.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{KeelError, Result};

/// Frame header size: frame_len (4) + crc32 (4)
pub const HEADER_SIZE: usize = 8;

/// Fixed part of a body: sequence (8) + op (1) + key_len (4) + value_len (4)
pub const MIN_BODY_SIZE: usize = 17;

/// Largest body accepted on decode (64 MB)
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Mutation kinds that can be logged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Operation {
    Put = 0x01,
    Delete = 0x02,
}

impl Operation {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Operation::Put),
            0x02 => Some(Operation::Delete),
            _ => None,
        }
    }
}

/// A single logged mutation
///
/// `sequence` is zero until the record is appended; the log writer assigns
/// the real value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub sequence: u64,
    pub operation: Operation,
    pub key: String,
    /// Present iff `operation == Put`
    pub value: Option<Bytes>,
}

/// Why a frame could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer ends before the frame does
    Incomplete,
    /// The frame is complete but its contents are invalid
    Malformed(String),
}

impl Record {
    /// A Put record awaiting a sequence number
    pub fn put(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            sequence: 0,
            operation: Operation::Put,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// A Delete record awaiting a sequence number
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            sequence: 0,
            operation: Operation::Delete,
            key: key.into(),
            value: None,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Check the shape and size invariants a record must satisfy before it is written
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(KeelError::InvalidKey("key must not be empty".to_string()));
        }
        match (self.operation, &self.value) {
            (Operation::Put, None) => {
                return Err(KeelError::InvalidKey(format!(
                    "put record for {:?} carries no value",
                    self.key
                )))
            }
            (Operation::Delete, Some(_)) => {
                return Err(KeelError::InvalidKey(format!(
                    "delete record for {:?} carries a value",
                    self.key
                )))
            }
            _ => {}
        }

        // Anything the decoder would refuse must never be acknowledged. The
        // bound also keeps key_len and value_len within u32.
        let body_len = self.encoded_size() - HEADER_SIZE;
        if body_len > MAX_FRAME_SIZE as usize {
            return Err(KeelError::RecordTooLarge {
                key: self.key.clone(),
                size: body_len,
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(())
    }

    fn value_len(&self) -> usize {
        self.value.as_ref().map_or(0, |v| v.len())
    }

    /// Size of the encoded frame, header included
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + MIN_BODY_SIZE + self.key.len() + self.value_len()
    }

    /// Encode into a frame (the CRC covers frame_len and the body):
    /// `[frame_len:u32][crc:u32][sequence:u64][op:u8][key_len:u32][key][value_len:u32][value]`
    pub fn encode(&self) -> Vec<u8> {
        let body_len = self.encoded_size() - HEADER_SIZE;
        let mut buf = Vec::with_capacity(self.encoded_size());

        buf.extend_from_slice(&(body_len as u32).to_le_bytes());
        // CRC placeholder, filled once the body is in place
        buf.extend_from_slice(&[0u8; 4]);

        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.push(self.operation as u8);
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.key.as_bytes());
        buf.extend_from_slice(&(self.value_len() as u32).to_le_bytes());
        if let Some(value) = &self.value {
            buf.extend_from_slice(value);
        }

        let crc = frame_crc(&buf[0..4], &buf[HEADER_SIZE..]);
        buf[4..8].copy_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Decode the first frame in `data`, returning the record and its encoded size
    pub fn decode(data: &[u8]) -> std::result::Result<(Self, usize), FrameError> {
        if data.len() < HEADER_SIZE {
            return Err(FrameError::Incomplete);
        }
        let header: [u8; HEADER_SIZE] = data[..HEADER_SIZE]
            .try_into()
            .map_err(|_| FrameError::Incomplete)?;
        let body_len = Self::body_len(&header)?;

        let end = HEADER_SIZE + body_len;
        if data.len() < end {
            return Err(FrameError::Incomplete);
        }

        let record = Self::decode_body(&header, &data[HEADER_SIZE..end])?;
        Ok((record, end))
    }

    /// Parse and bound-check the body length from a frame header
    pub fn body_len(header: &[u8; HEADER_SIZE]) -> std::result::Result<usize, FrameError> {
        let body_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if body_len > MAX_FRAME_SIZE {
            return Err(FrameError::Malformed(format!(
                "frame length {} exceeds maximum {}",
                body_len, MAX_FRAME_SIZE
            )));
        }
        if (body_len as usize) < MIN_BODY_SIZE {
            return Err(FrameError::Malformed(format!(
                "frame length {} below minimum {}",
                body_len, MIN_BODY_SIZE
            )));
        }
        Ok(body_len as usize)
    }

    /// Decode a complete body whose length has already been checked against the header
    pub fn decode_body(
        header: &[u8; HEADER_SIZE],
        body: &[u8],
    ) -> std::result::Result<Self, FrameError> {
        let stored_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let computed_crc = frame_crc(&header[0..4], body);
        if stored_crc != computed_crc {
            return Err(FrameError::Malformed(format!(
                "checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, computed_crc
            )));
        }

        let mut cursor = BodyCursor { body, pos: 0 };

        let sequence = u64::from_le_bytes(cursor.take_array::<8>()?);
        let op = cursor.take_array::<1>()?[0];
        let operation = Operation::from_u8(op)
            .ok_or_else(|| FrameError::Malformed(format!("unknown operation tag {:#04x}", op)))?;

        let key_len = u32::from_le_bytes(cursor.take_array::<4>()?) as usize;
        let key_bytes = cursor.take(key_len)?;
        let key = std::str::from_utf8(key_bytes)
            .map_err(|e| FrameError::Malformed(format!("key is not UTF-8: {}", e)))?
            .to_string();
        if key.is_empty() {
            return Err(FrameError::Malformed("empty key".to_string()));
        }

        let value_len = u32::from_le_bytes(cursor.take_array::<4>()?) as usize;
        let value_bytes = cursor.take(value_len)?;

        if cursor.pos != body.len() {
            return Err(FrameError::Malformed(format!(
                "{} trailing bytes in frame body",
                body.len() - cursor.pos
            )));
        }

        let value = match operation {
            Operation::Put => Some(Bytes::copy_from_slice(value_bytes)),
            Operation::Delete if value_len == 0 => None,
            Operation::Delete => {
                return Err(FrameError::Malformed(
                    "delete frame carries a value".to_string(),
                ))
            }
        };

        Ok(Self {
            sequence,
            operation,
            key,
            value,
        })
    }
}

/// CRC32 over the length field and the body
fn frame_crc(len_bytes: &[u8], body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(len_bytes);
    hasher.update(body);
    hasher.finalize()
}

/// Bounds-checked reads over a frame body
struct BodyCursor<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> BodyCursor<'a> {
    fn take(&mut self, len: usize) -> std::result::Result<&'a [u8], FrameError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.body.len())
            .ok_or_else(|| FrameError::Malformed("field overruns frame body".to_string()))?;
        let slice = &self.body[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> std::result::Result<[u8; N], FrameError> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }
}

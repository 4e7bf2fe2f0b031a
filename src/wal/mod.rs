//! Durable Log Store
//!
//! Provides durability through an append-only record log plus periodic
//! compaction into a snapshot.
//!
//! ## Responsibilities
//! - Append records and fsync before acknowledging
//! - CRC32 checksums for torn-write and corruption detection
//! - Sequence numbers for ordering, never reused
//! - Deterministic replay of snapshot + log tail
//! - Snapshot installation via temp-file-then-rename
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── log            append-only frames
//!   ├── snapshot       latest installed snapshot
//!   ├── snapshot.tmp   (transient) snapshot being written
//!   └── log.tmp        (transient) log being rewritten after a snapshot
//! ```
//!
//! ## Frame Format
//! ```text
//! ┌──────────┬─────────┬─────────┬────────┬────────────┬─────┬────────────┬───────┐
//! │ Len (4)  │ CRC (4) │ Seq (8) │ Op (1) │ KeyLen (4) │ Key │ ValLen (4) │ Value │
//! └──────────┴─────────┴─────────┴────────┴────────────┴─────┴────────────┴───────┘
//! ```

mod reader;
mod record;
mod recovery;
mod replay;
mod snapshot;
mod store;
mod writer;

use std::path::Path;

use crate::error::Result;

pub use reader::{LogReader, TailState};
pub use record::{FrameError, Operation, Record, HEADER_SIZE, MAX_FRAME_SIZE, MIN_BODY_SIZE};
pub use recovery::{LogRecovery, RecoveryReport};
pub use replay::{Replay, ReplayStats};
pub use snapshot::{
    PendingSnapshot, Snapshot, SnapshotEntry, SNAPSHOT_FILENAME, SNAPSHOT_TEMP_FILENAME,
};
pub use store::{CompactionStats, LogStore};
pub use writer::LogWriter;

pub const LOG_FILENAME: &str = "log";
pub const LOG_TEMP_FILENAME: &str = "log.tmp";

/// Read-only integrity check of a store directory
pub fn verify(dir: &Path) -> Result<RecoveryReport> {
    LogRecovery::verify(dir)
}

/// Fsync a directory so renames and creations inside it are durable
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    std::fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> {
    // NTFS journals metadata; directory handles cannot be fsynced there.
    Ok(())
}

//! # KeelKV
//!
//! An embedded, single-process key-value store with:
//! - An append-only record log, fsynced on every mutation
//! - Crash recovery that tolerates a torn final write and refuses mid-log corruption
//! - Snapshot compaction with temp-file-then-rename installation
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Caller (CLI / application)                   │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ create / read / update / delete / list
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Store                                 │
//! │            (Single Writer / Multi Reader)                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │ 1. append + fsync       │ 2. then update
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  LogStore   │          │    Index    │
//!   │ log+snapshot│          │  (RwLock)   │
//!   └─────────────┘          └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use keelkv::Store;
//!
//! # fn main() -> keelkv::Result<()> {
//! let store: Store<String> = Store::open_path("./keelkv_data")?;
//! store.create("greeting", "hello".to_string())?;
//! assert_eq!(store.read("greeting")?, "hello");
//! store.close()?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod wal;
pub mod index;
pub mod engine;

mod compaction;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{KeelError, Result};
pub use config::{CompactionPolicy, Config};
pub use engine::{Store, StoreValue};
pub use wal::{CompactionStats, RecoveryReport};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of KeelKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

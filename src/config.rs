//! Configuration for KeelKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{KeelError, Result};

/// Main configuration for a KeelKV store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── log          (append-only record log)
    ///     └── snapshot     (latest compacted index)
    pub data_dir: PathBuf,

    /// Create `data_dir` if it does not exist yet
    pub create_if_missing: bool,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// When the log tail gets folded into a new snapshot
    pub compaction: CompactionPolicy,
}

/// Compaction trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionPolicy {
    /// Only on explicit `Store::compact()` calls
    Manual,

    /// Compact after a mutation once the log tail holds `count` records
    EveryNRecords { count: u64 },

    /// Compact from a background thread every `interval` if the tail is non-empty
    Background { interval: Duration },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./keelkv_data"),
            create_if_missing: true,
            compaction: CompactionPolicy::EveryNRecords { count: 10_000 },
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject configurations the store cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(KeelError::Config("data_dir must not be empty".to_string()));
        }

        match self.compaction {
            CompactionPolicy::EveryNRecords { count: 0 } => Err(KeelError::Config(
                "compaction record threshold must be at least 1".to_string(),
            )),
            CompactionPolicy::Background { interval } if interval.is_zero() => Err(
                KeelError::Config("compaction interval must be non-zero".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Whether a missing data directory is created on open
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.config.create_if_missing = create;
        self
    }

    /// Set the compaction policy
    pub fn compaction(mut self, policy: CompactionPolicy) -> Self {
        self.config.compaction = policy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

//! Engine Module
//!
//! The key-value engine that sits on top of the durable log store.
//!
//! ## Responsibilities
//! - Enforce create/read/update/delete preconditions against the index
//! - Append to the log before touching the index
//! - Rebuild the index by replay on open
//! - Decide when to compact

use std::fs;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::compaction::Compactor;
use crate::config::{CompactionPolicy, Config};
use crate::error::{KeelError, Result};
use crate::index::{Index, IndexEntry};
use crate::wal::{CompactionStats, LogStore, Record, RecoveryReport, Snapshot};

/// Values a store can hold; they are logged in their bincode encoding.
pub trait StoreValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> StoreValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// An open key-value store
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Mutations** (create/update/delete): serialized by the log mutex
///   - Index check, durable append and index update happen under one lock
///   - The index is only changed after the append has been fsynced
///
/// - **Reads** (read/list_keys): index read lock only
///   - Never wait on an fsync in progress
///   - See the state before or after any mutation, never in between
///
/// - **Compaction**: copies the index under the log mutex, writes the
///   snapshot with no lock held, then re-takes the mutex for the rename and
///   log rewrite
///
/// Share across threads with `Arc<Store<V>>`.
pub struct Store<V> {
    shared: Arc<Shared<V>>,
    compactor: Option<Compactor>,
    closed: bool,
}

/// State shared between the store handle and the compactor thread
pub(crate) struct Shared<V> {
    config: Config,

    /// Durable log; holding this lock is the single-writer scope
    log: Mutex<LogStore>,

    /// Live keys (internal RwLock)
    index: Index<V>,

    /// Serializes compactions against each other
    compaction_lock: Mutex<()>,
}

#[derive(Clone, Copy)]
enum PutMode {
    Create,
    Update,
}

impl<V: StoreValue> Store<V> {
    /// Open or create a store with the given config
    ///
    /// On startup:
    /// 1. Create the data directory if allowed
    /// 2. Recover the log (truncate a torn tail, fail on corruption)
    /// 3. Replay snapshot + log tail into a fresh index
    /// 4. Start the background compactor if configured
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let dir = config.data_dir.clone();
        if !dir.exists() {
            if !config.create_if_missing {
                return Err(KeelError::Config(format!(
                    "data directory {} does not exist",
                    dir.display()
                )));
            }
            fs::create_dir_all(&dir)?;
        }

        let log = LogStore::open(&dir)?;
        let index = Index::new();

        let mut replay = log.replay()?;
        for record in replay.by_ref() {
            index.apply(record?)?;
        }
        let stats = replay.stats();

        tracing::info!(
            dir = %dir.display(),
            keys = index.len(),
            snapshot_sequence = stats.snapshot_sequence,
            snapshot_records = stats.snapshot_records,
            log_records = stats.log_records,
            skipped_records = stats.skipped_records,
            next_sequence = log.next_sequence(),
            "store opened"
        );

        let shared = Arc::new(Shared {
            config,
            log: Mutex::new(log),
            index,
            compaction_lock: Mutex::new(()),
        });

        let compactor = match shared.config.compaction {
            CompactionPolicy::Background { interval } => {
                Some(Compactor::spawn(Arc::clone(&shared), interval)?)
            }
            _ => None,
        };

        Ok(Self {
            shared,
            compactor,
            closed: false,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Config::builder().data_dir(path.as_ref()).build())
    }

    /// Insert a new key; fails with `KeyExists` if the key is live
    pub fn create(&self, key: &str, value: V) -> Result<()> {
        self.shared.put(key, value, PutMode::Create)
    }

    /// Current value of a key; fails with `KeyNotFound` if absent
    pub fn read(&self, key: &str) -> Result<V> {
        self.shared.index.get(key).ok_or_else(|| KeelError::KeyNotFound {
            key: key.to_string(),
        })
    }

    /// Replace the value of a live key; fails with `KeyNotFound` if absent
    pub fn update(&self, key: &str, value: V) -> Result<()> {
        self.shared.put(key, value, PutMode::Update)
    }

    /// Remove a live key; fails with `KeyNotFound` if absent
    pub fn delete(&self, key: &str) -> Result<()> {
        self.shared.delete(key)
    }

    /// All live keys in ascending byte order
    pub fn list_keys(&self) -> Vec<String> {
        self.shared.index.keys()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.shared.index.contains(key)
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.shared.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.index.is_empty()
    }

    /// Fold the log into a new snapshot now
    ///
    /// A no-op when nothing was appended since the last snapshot.
    pub fn compact(&self) -> Result<CompactionStats> {
        self.shared.compact()
    }
}

impl<V> Store<V> {
    /// Sequence of the most recent durable mutation (0 if none)
    pub fn last_sequence(&self) -> u64 {
        self.shared.log.lock().last_sequence()
    }

    /// Sequence reflected by the installed snapshot (0 if none)
    pub fn snapshot_sequence(&self) -> u64 {
        self.shared.log.lock().snapshot_sequence()
    }

    /// Log records not yet folded into a snapshot
    pub fn tail_records(&self) -> u64 {
        self.shared.tail_records()
    }

    /// What recovery found when the store was opened
    pub fn recovery_report(&self) -> RecoveryReport {
        self.shared.log.lock().recovery_report().clone()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.shared.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Close the store gracefully
    ///
    /// Stops the compactor and syncs the log to disk.
    pub fn close(mut self) -> Result<()> {
        let result = self.shutdown();
        if result.is_ok() {
            tracing::info!(dir = %self.data_dir().display(), "store closed");
        }
        result
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(compactor) = self.compactor.take() {
            compactor.stop();
        }
        self.shared.log.lock().sync()
    }
}

impl<V> Drop for Store<V> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "failed to sync log while dropping store");
        }
    }
}

impl<V> Shared<V> {
    pub(crate) fn tail_records(&self) -> u64 {
        self.log.lock().tail_records()
    }
}

impl<V: StoreValue> Shared<V> {
    fn put(&self, key: &str, value: V, mode: PutMode) -> Result<()> {
        validate_key(key)?;
        let encoded = Bytes::from(bincode::serialize(&value)?);

        let tail_records = {
            let mut log = self.log.lock();

            let exists = self.index.contains(key);
            match mode {
                PutMode::Create if exists => {
                    return Err(KeelError::KeyExists {
                        key: key.to_string(),
                    })
                }
                PutMode::Update if !exists => {
                    return Err(KeelError::KeyNotFound {
                        key: key.to_string(),
                    })
                }
                _ => {}
            }

            let sequence = log.append(Record::put(key, encoded.clone()))?;
            self.index.insert(
                key.to_string(),
                IndexEntry {
                    value,
                    encoded,
                    sequence,
                },
            );
            log.tail_records()
        };

        self.after_mutation(tail_records);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let tail_records = {
            let mut log = self.log.lock();

            if !self.index.contains(key) {
                return Err(KeelError::KeyNotFound {
                    key: key.to_string(),
                });
            }

            log.append(Record::delete(key))?;
            self.index.remove(key);
            log.tail_records()
        };

        self.after_mutation(tail_records);
        Ok(())
    }

    /// Threshold-triggered compaction, run after the mutation lock is released
    ///
    /// The mutation itself is already durable, so a failed compaction is
    /// logged rather than returned.
    fn after_mutation(&self, tail_records: u64) {
        let CompactionPolicy::EveryNRecords { count } = self.config.compaction else {
            return;
        };
        if tail_records < count {
            return;
        }

        // Another thread is already compacting.
        let Some(_guard) = self.compaction_lock.try_lock() else {
            return;
        };
        if let Err(e) = self.compact_locked() {
            tracing::warn!(error = %e, "threshold compaction failed");
        }
    }

    pub(crate) fn compact(&self) -> Result<CompactionStats> {
        let _guard = self.compaction_lock.lock();
        self.compact_locked()
    }

    fn compact_locked(&self) -> Result<CompactionStats> {
        // Phase 1: consistent copy. Under the log lock the index reflects
        // exactly `last_sequence`.
        let (dir, snapshot) = {
            let log = self.log.lock();
            if log.last_sequence() == log.snapshot_sequence() {
                return Ok(CompactionStats {
                    sequence: log.snapshot_sequence(),
                    entries: self.index.len() as u64,
                    ..CompactionStats::default()
                });
            }
            (
                log.dir().to_path_buf(),
                Snapshot::new(log.last_sequence(), self.index.snapshot_entries()),
            )
        };

        // Phase 2: write the snapshot while mutations continue.
        let pending = LogStore::write_snapshot(&dir, snapshot)?;

        // Phase 3: pointer switch and log retirement.
        self.log.lock().install_snapshot(pending)
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(KeelError::InvalidKey("key must not be empty".to_string()));
    }
    Ok(())
}

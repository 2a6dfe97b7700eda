//! Persistent storage backend for hashequiv.
//!
//! This module provides durable, crash-safe storage with:
//! - Write-Ahead Logging (WAL) for crash recovery
//! - File locking so only one process owns a database directory
//! - CRC32 checksums for corruption detection
//! - Segment snapshots so the WAL stays short
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 PersistentEquivalenceStore                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌──────────────┐  │
//! │  │ WriteAheadLog   │  │ SegmentManager  │  │ RecordIndex  │  │
//! │  │ (append-only)   │  │ (snapshots)     │  │ (RwLock)     │  │
//! │  └────────┬────────┘  └────────┬────────┘  └──────────────┘  │
//! │           └──────────┬─────────┘                             │
//! │                      ↓                                       │
//! │           ┌─────────────────────┐                            │
//! │           │   FileLock (flock)  │                            │
//! │           └─────────────────────┘                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod codec;
mod file_lock;
mod segment;
mod store;
mod wal;

pub use file_lock::FileLock;
pub use segment::{Segment, SegmentData, SegmentManager};
pub use store::{CompactionResult, PersistentEquivalenceStore};
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::HashEquivError;

/// Configuration for persistent storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// WAL size (bytes) above which an insert triggers compaction.
    pub max_wal_size: u64,
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024, // 64 MB
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    const MIN_WAL_SIZE: u64 = 4 * 1024; // 4 KiB minimum to avoid degenerate compaction loops

    /// Check the configuration, returning it unchanged if usable.
    ///
    /// # Errors
    /// Returns a storage error if `max_wal_size` is below 4 KiB.
    pub fn validate(self) -> Result<Self, HashEquivError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(HashEquivError::storage(format!(
                "max_wal_size must be at least {} bytes (got {})",
                Self::MIN_WAL_SIZE,
                self.max_wal_size
            )));
        }
        Ok(self)
    }
}

/// Open or create a persistent equivalence database at the given path.
///
/// # Arguments
/// * `path` - Directory to store the database files
/// * `config` - Optional configuration (uses defaults if None)
///
/// # Errors
/// - If the path cannot be created or accessed
/// - If another process holds the lock
/// - If WAL replay fails due to corruption
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use hashequiv::storage::open_database;
/// use hashequiv::EquivalenceEngine;
///
/// let store = open_database("./hashes.db", None)?;
/// let engine = EquivalenceEngine::new(Arc::new(store));
/// ```
pub fn open_database(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentEquivalenceStore, HashEquivError> {
    let cfg = config.unwrap_or_default().validate()?;
    PersistentEquivalenceStore::open(path.as_ref(), cfg)
}

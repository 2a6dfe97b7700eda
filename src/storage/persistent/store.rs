//! WAL-backed equivalence store.
//!
//! Reads are served from an in-memory `RecordIndex`. Inserts and
//! compaction serialize on a writer mutex that readers never touch. An
//! insert checks the uniqueness constraint under a read lock, appends to
//! the WAL, and only then takes the index write lock to apply the record,
//! so insert-if-absent is atomic, nothing becomes visible before it is
//! durable, and readers wait at most for one in-memory index update.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};

use tracing::{debug, info, warn};

use crate::error::HashEquivError;
use crate::record::{NewTaskRecord, TaskRecord};
use crate::storage::guard::OuthashLocks;
use crate::storage::index::RecordIndex;
use crate::storage::traits::{EquivalenceStore, StorageError};

use super::file_lock::FileLock;
use super::segment::{SegmentData, SegmentManager};
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

/// WAL file name inside the database directory.
pub const WAL_FILE_NAME: &str = "hashequiv.wal";

/// Segment directory name inside the database directory.
pub const SEGMENTS_DIR_NAME: &str = "segments";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Result of a compaction.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    /// Number of records written to the new segment.
    pub records_compacted: u64,
    /// Path to the new segment file (if one was created).
    pub segment_path: Option<PathBuf>,
    /// WAL size before compaction.
    pub wal_size_before: u64,
    /// WAL size after compaction.
    pub wal_size_after: u64,
}

/// Durable equivalence store.
pub struct PersistentEquivalenceStore {
    dir: PathBuf,
    _lock: FileLock,
    wal: WriteAheadLog,
    segments: Mutex<SegmentManager>,
    config: PersistentConfig,
    index: RwLock<RecordIndex>,
    /// Held by inserts and compaction; readers never take it.
    writer: Mutex<()>,
    locks: OuthashLocks,
}

impl fmt::Debug for PersistentEquivalenceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentEquivalenceStore")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PersistentEquivalenceStore {
    /// Open or create a database directory.
    ///
    /// Loads segments first, then replays the WAL on top of them.
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, HashEquivError> {
        fs::create_dir_all(dir).map_err(|e| {
            HashEquivError::storage(format!("failed to create database directory: {e}"))
        })?;

        let lock = FileLock::acquire(dir)
            .map_err(|e| HashEquivError::storage(format!("failed to acquire lock: {e}")))?;

        let wal = WriteAheadLog::open(&dir.join(WAL_FILE_NAME), config.sync_on_write)
            .map_err(|e| HashEquivError::storage(format!("failed to open WAL: {e}")))?;

        let mut segments = SegmentManager::open(&dir.join(SEGMENTS_DIR_NAME))
            .map_err(|e| HashEquivError::storage(format!("failed to open segments: {e}")))?;
        // Leftovers from a crash between segment rename and retirement
        if let Err(e) = segments.retire_superseded() {
            warn!(error = %e, "failed to remove superseded segments");
        }

        let records = segments
            .load_latest_records()
            .map_err(|e| HashEquivError::storage(format!("failed to load segment data: {e}")))?;
        let index = RecordIndex::from_records(records);
        debug!(
            records = index.len(),
            segments = segments.segments().len(),
            "loaded segments"
        );

        let store = Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            wal,
            segments: Mutex::new(segments),
            config,
            index: RwLock::new(index),
            writer: Mutex::new(()),
            locks: OuthashLocks::new(),
        };

        store.replay_wal()?;
        Ok(store)
    }

    /// Re-apply WAL entries written since the last compaction.
    ///
    /// Replay is idempotent: entries already present in a segment (a crash
    /// between segment rename and WAL truncation) are skipped.
    fn replay_wal(&self) -> Result<(), HashEquivError> {
        let iter = self
            .wal
            .iter()
            .map_err(|e| HashEquivError::storage(format!("failed to iterate WAL: {e}")))?;

        let mut index = self
            .index
            .write()
            .map_err(|_| HashEquivError::storage("poisoned lock: task.replay"))?;

        let mut applied = 0usize;
        let mut skipped = 0usize;
        for entry_result in iter {
            let entry = entry_result
                .map_err(|e| HashEquivError::storage(format!("corrupted WAL entry: {e}")))?;

            match entry.kind {
                WalEntryKind::TaskInsert(record) => {
                    if index.apply(record) {
                        applied += 1;
                    } else {
                        skipped += 1;
                    }
                }
                WalEntryKind::Checkpoint { .. } => {}
            }
        }

        if applied > 0 || skipped > 0 {
            info!(applied, skipped, "replayed WAL entries");
        }
        Ok(())
    }

    /// Snapshot all records into a new segment, truncate the WAL and
    /// remove the segments the snapshot supersedes.
    ///
    /// Inserts wait for the compaction to finish; readers do not.
    /// If it fails partway the WAL still holds every record and is
    /// replayed on next open.
    pub fn compact(&self) -> Result<CompactionResult, HashEquivError> {
        let writer = self
            .writer
            .lock()
            .map_err(|_| HashEquivError::storage("poisoned lock: task.writer"))?;
        self.compact_locked(&writer)
    }

    /// Compaction body. The writer guard keeps inserts out between the
    /// snapshot and the WAL truncation.
    fn compact_locked(&self, _writer: &MutexGuard<'_, ()>) -> Result<CompactionResult, HashEquivError> {
        let mut segments = self
            .segments
            .lock()
            .map_err(|_| HashEquivError::storage("poisoned lock: segments"))?;

        let current_seq = self
            .wal
            .current_sequence()
            .map_err(|e| HashEquivError::storage(format!("failed to read WAL sequence: {e}")))?;
        if current_seq == 0 {
            let size = self.wal_size();
            return Ok(CompactionResult {
                records_compacted: 0,
                segment_path: None,
                wal_size_before: size,
                wal_size_after: size,
            });
        }

        let wal_size_before = self.wal_size();
        let data = {
            let index = self
                .index
                .read()
                .map_err(|_| HashEquivError::storage("poisoned lock: task.snapshot"))?;
            SegmentData {
                records: index.records().cloned().collect(),
            }
        };

        let persisted_seq = segments.persisted_sequence();
        let mut writer = segments.create_segment_writer(persisted_seq + 1).map_err(|e| {
            HashEquivError::storage(format!("failed to create segment writer: {e}"))
        })?;

        if let Err(e) = writer.write_data(&data, persisted_seq + current_seq) {
            let _ = writer.abort();
            return Err(HashEquivError::storage(format!("failed to write segment data: {e}")));
        }

        let segment = writer
            .finalize()
            .map_err(|e| HashEquivError::storage(format!("failed to finalize segment: {e}")))?;
        let segment_path = segment.path().to_path_buf();
        segments.add_segment(segment);

        self.wal
            .append(WalEntryKind::Checkpoint {
                up_to_sequence: current_seq,
            })
            .map_err(|e| HashEquivError::storage(format!("failed to write checkpoint: {e}")))?;

        self.wal
            .truncate()
            .map_err(|e| HashEquivError::storage(format!("failed to truncate WAL: {e}")))?;

        // The new snapshot is durable; older ones are redundant
        if let Err(e) = segments.retire_superseded() {
            warn!(error = %e, "failed to remove superseded segments");
        }

        let result = CompactionResult {
            records_compacted: data.record_count(),
            segment_path: Some(segment_path),
            wal_size_before,
            wal_size_after: self.wal_size(),
        };
        info!(
            records = result.records_compacted,
            wal_size_before = result.wal_size_before,
            "compacted WAL into segment"
        );
        Ok(result)
    }

    /// The database directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The active configuration.
    pub fn config(&self) -> &PersistentConfig {
        &self.config
    }

    /// Current WAL size in bytes.
    pub fn wal_size(&self) -> u64 {
        self.wal.size_bytes().unwrap_or(0)
    }

    /// Number of segment files.
    pub fn segment_count(&self) -> usize {
        self.segments.lock().map_or(0, |s| s.segments().len())
    }
}

impl EquivalenceStore for PersistentEquivalenceStore {
    fn insert(&self, record: NewTaskRecord) -> Result<TaskRecord, StorageError> {
        let writer = self.writer.lock().map_err(|_| lock_err("task.writer"))?;

        // No other writer can run between this check and `apply`
        let record = self
            .index
            .read()
            .map_err(|_| lock_err("task.insert"))?
            .prepare(record)?;

        self.wal
            .append(WalEntryKind::TaskInsert(record.clone()))
            .map_err(|e| StorageError::BackendError(format!("WAL write failed: {e}")))?;

        self.index
            .write()
            .map_err(|_| lock_err("task.insert"))?
            .apply(record.clone());

        if self.wal_size() > self.config.max_wal_size {
            // Record is already durable in the WAL; retried on the next insert
            if let Err(e) = self.compact_locked(&writer) {
                warn!(error = %e, "automatic compaction failed");
            }
        }

        Ok(record)
    }

    fn get(
        &self,
        method: &str,
        outhash: &str,
        taskhash: &str,
    ) -> Result<Option<TaskRecord>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("task.get"))?;
        Ok(index.get(method, outhash, taskhash).cloned())
    }

    fn find_oldest_by_taskhash(
        &self,
        method: &str,
        taskhash: &str,
    ) -> Result<Option<TaskRecord>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("task.by_taskhash"))?;
        Ok(index.oldest_by_taskhash(method, taskhash).cloned())
    }

    fn find_merge_candidate(
        &self,
        method: &str,
        outhash: &str,
        taskhash: &str,
    ) -> Result<Option<TaskRecord>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("task.candidate"))?;
        Ok(index.merge_candidate(method, outhash, taskhash).cloned())
    }

    fn find_by_outhash(&self, method: &str, outhash: &str) -> Result<Vec<TaskRecord>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("task.by_outhash"))?;
        Ok(index.by_outhash(method, outhash))
    }

    fn count(&self) -> Result<usize, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("task.count"))?;
        Ok(index.len())
    }

    fn outhash_locks(&self) -> &OuthashLocks {
        &self.locks
    }
}

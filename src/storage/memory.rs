//! In-memory storage backend.
//!
//! Thread-safe in-memory implementation of `EquivalenceStore`. It is
//! intended for embedded usage, tests, and as a reference implementation.

use std::sync::RwLock;

use crate::record::{NewTaskRecord, TaskRecord};
use crate::storage::guard::OuthashLocks;
use crate::storage::index::RecordIndex;
use crate::storage::traits::{EquivalenceStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// In-memory equivalence store.
#[derive(Debug, Default)]
pub struct InMemoryEquivalenceStore {
    index: RwLock<RecordIndex>,
    locks: OuthashLocks,
}

impl InMemoryEquivalenceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EquivalenceStore for InMemoryEquivalenceStore {
    fn insert(&self, record: NewTaskRecord) -> Result<TaskRecord, StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("task.insert"))?;
        index.insert(record)
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

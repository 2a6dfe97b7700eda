//! Abstract storage trait for hashequiv.
//!
//! The engine only ever talks to an `EquivalenceStore`. This keeps the
//! resolution logic independent of the backend:
//! - In-memory backend for tests and embedded use
//! - Persistent backend (WAL + segments) for production

use thiserror::Error;

use crate::record::{NewTaskRecord, TaskRecord};
use crate::storage::guard::OuthashLocks;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A record with the same `(method, outhash, taskhash)` already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

impl StorageError {
    /// Returns true if this is a uniqueness-constraint violation.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateKey(_))
    }
}

/// Storage trait for task records.
///
/// # Consistency
/// - `insert` is insert-if-absent: it either stores the whole record or
///   fails with `DuplicateKey`, never anything in between
/// - Once `insert` returns `Ok`, the record is visible to every reader
/// - "Oldest" always means earliest `created`, ties broken by lowest `id`
pub trait EquivalenceStore: Send + Sync {
    /// Insert a new record, assigning its id. Returns the stored record.
    ///
    /// # Errors
    /// - `DuplicateKey`: the `(method, outhash, taskhash)` triple already exists
    fn insert(&self, record: NewTaskRecord) -> Result<TaskRecord, StorageError>;

    /// Get the record for an exact `(method, outhash, taskhash)` triple.
    fn get(
        &self,
        method: &str,
        outhash: &str,
        taskhash: &str,
    ) -> Result<Option<TaskRecord>, StorageError>;

    /// Oldest record with this `(method, taskhash)`, across all outhashes.
    fn find_oldest_by_taskhash(
        &self,
        method: &str,
        taskhash: &str,
    ) -> Result<Option<TaskRecord>, StorageError>;

    /// Candidate record for a merge.
    ///
    /// Among records with this `(method, outhash)`, the one whose taskhash
    /// equals `taskhash` if present, otherwise the oldest.
    fn find_merge_candidate(
        &self,
        method: &str,
        outhash: &str,
        taskhash: &str,
    ) -> Result<Option<TaskRecord>, StorageError>;

    /// All records with this `(method, outhash)`, oldest first.
    fn find_by_outhash(&self, method: &str, outhash: &str) -> Result<Vec<TaskRecord>, StorageError>;

    /// Total number of stored records.
    fn count(&self) -> Result<usize, StorageError>;

    /// Lock table serializing merges per `(method, outhash)`.
    ///
    /// One table per store, shared by every engine that writes to it.
    fn outhash_locks(&self) -> &OuthashLocks;
}

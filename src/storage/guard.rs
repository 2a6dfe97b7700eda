//! Per-outhash mutual exclusion for the merge path.
//!
//! Two reports for the same `(method, outhash)` must not both observe an
//! empty equivalence class, or they would each seed it with their own
//! unihash. Holding an `OuthashGuard` serializes the find-then-insert
//! sequence for one outhash while leaving unrelated outhashes concurrent.
//!
//! The table lives in the store, not the engine: every engine built over
//! the same store shares it.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};

use crate::storage::traits::StorageError;

type OuthashKey = (String, String);

fn lock_err() -> StorageError {
    StorageError::BackendError("poisoned lock: outhash_locks".to_string())
}

/// Set of outhashes currently being merged.
#[derive(Debug, Default)]
pub struct OuthashLocks {
    held: Mutex<HashSet<OuthashKey>>,
    released: Condvar,
}

impl OuthashLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `(method, outhash)` is free, then claim it.
    ///
    /// # Errors
    /// Returns a backend error if the lock table is poisoned.
    pub fn acquire(&self, method: &str, outhash: &str) -> Result<OuthashGuard<'_>, StorageError> {
        let key = (method.to_string(), outhash.to_string());
        let mut held = self
            .held
            .lock()
            .map_err(|_| lock_err())?;

        while held.contains(&key) {
            held = self
                .released
                .wait(held)
                .map_err(|_| lock_err())?;
        }
        held.insert(key.clone());

        Ok(OuthashGuard { locks: self, key })
    }

    /// Number of outhashes currently claimed.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Releases its outhash on drop.
#[derive(Debug)]
pub struct OuthashGuard<'a> {
    locks: &'a OuthashLocks,
    key: OuthashKey,
}

impl Drop for OuthashGuard<'_> {
    fn drop(&mut self) {
        // Release even if another holder panicked; the set stays consistent
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.key);
        drop(held);
        self.locks.released.notify_all();
    }
}

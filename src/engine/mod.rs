//! Equivalence engine.
//!
//! `EquivalenceEngine` is the synchronous core of the server: it validates
//! requests, answers lookups from the store and serializes merges per
//! `(method, outhash)` using the store's lock table. It is cheap to clone
//! and safe to share across threads; the transport calls into it from
//! blocking worker threads.

mod lookup;
mod write_path;

pub use write_path::MergeOutcome;

use std::sync::Arc;

use crate::error::HashEquivResult;
use crate::record::{Equivalence, TaskMetadata, TaskRecord};
use crate::request::{GetEquivalentRequest, ReportEquivalentRequest};
use crate::storage::EquivalenceStore;

use write_path::MergeInput;

/// Resolves and records task equivalences against a store.
///
/// Any number of engines may share one store; merges serialize on the
/// store's `outhash_locks`.
#[derive(Clone)]
pub struct EquivalenceEngine {
    store: Arc<dyn EquivalenceStore>,
}

impl std::fmt::Debug for EquivalenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EquivalenceEngine")
            .field("locks", self.store.outhash_locks())
            .finish_non_exhaustive()
    }
}

impl EquivalenceEngine {
    /// Create an engine over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn EquivalenceStore>) -> Self {
        Self { store }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EquivalenceStore> {
        &self.store
    }

    /// Look up the oldest record for `(method, taskhash)`.
    ///
    /// # Errors
    /// Returns an execution error if the store cannot be read.
    pub fn resolve(&self, method: &str, taskhash: &str) -> HashEquivResult<Option<TaskRecord>> {
        lookup::resolve(self.store.as_ref(), method, taskhash)
    }

    /// Merge a reported outhash and return the resulting record.
    ///
    /// # Errors
    /// Returns an execution error if the store fails.
    pub fn merge(
        &self,
        method: &str,
        outhash: &str,
        taskhash: &str,
        unihash: &str,
        metadata: TaskMetadata,
    ) -> HashEquivResult<TaskRecord> {
        self.merge_with_outcome(method, outhash, taskhash, unihash, metadata)
            .map(|(record, _)| record)
    }

    /// Like [`merge`](Self::merge), also reporting which case applied.
    ///
    /// # Errors
    /// Returns an execution error if the store fails.
    pub fn merge_with_outcome(
        &self,
        method: &str,
        outhash: &str,
        taskhash: &str,
        unihash: &str,
        metadata: TaskMetadata,
    ) -> HashEquivResult<(TaskRecord, MergeOutcome)> {
        let _guard = self.store.outhash_locks().acquire(method, outhash)?;
        write_path::merge(
            self.store.as_ref(),
            MergeInput {
                method,
                outhash,
                taskhash,
                unihash,
                metadata,
            },
        )
    }

    /// Answer a lookup request.
    ///
    /// # Errors
    /// Validation errors for malformed requests, execution errors from the store.
    pub fn get_equivalent(
        &self,
        request: &GetEquivalentRequest,
    ) -> HashEquivResult<Option<Equivalence>> {
        request.validate()?;
        Ok(self
            .resolve(&request.method, &request.taskhash)?
            .map(|r| r.equivalence()))
    }

    /// Answer a report request.
    ///
    /// # Errors
    /// Validation errors for malformed requests, execution errors from the store.
    pub fn report_equivalent(
        &self,
        request: ReportEquivalentRequest,
    ) -> HashEquivResult<Equivalence> {
        request.validate()?;
        let ReportEquivalentRequest {
            method,
            outhash,
            taskhash,
            unihash,
            metadata,
        } = request;
        let record = self.merge(&method, &outhash, &taskhash, &unihash, metadata)?;
        Ok(record.equivalence())
    }
}

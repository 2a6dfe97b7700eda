//! Write path: merge a reported outhash into its equivalence class.
//!
//! The caller must hold the store's `OuthashGuard` for `(method, outhash)`. The
//! unique key in the store is the second line of defence: if an insert
//! still collides, the existing row is authoritative and is returned.

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{HashEquivError, HashEquivResult};
use crate::record::{NewTaskRecord, TaskMetadata, TaskRecord};
use crate::storage::EquivalenceStore;

/// How a merge was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No record shared the outhash; the caller's unihash seeded a new class.
    Created,
    /// A different taskhash already produced this outhash; its unihash was
    /// inherited by a new record.
    Inherited,
    /// The exact triple was already stored; nothing was written.
    Existing,
}

impl MergeOutcome {
    /// Returns true if a record was written.
    #[must_use]
    pub const fn inserted(self) -> bool {
        !matches!(self, Self::Existing)
    }
}

/// Inputs to a merge.
#[derive(Debug, Clone)]
pub(crate) struct MergeInput<'a> {
    pub method: &'a str,
    pub outhash: &'a str,
    pub taskhash: &'a str,
    pub unihash: &'a str,
    pub metadata: TaskMetadata,
}

pub(crate) fn merge(
    store: &dyn EquivalenceStore,
    input: MergeInput<'_>,
) -> HashEquivResult<(TaskRecord, MergeOutcome)> {
    let MergeInput {
        method,
        outhash,
        taskhash,
        unihash,
        metadata,
    } = input;

    let candidate = store.find_merge_candidate(method, outhash, taskhash)?;

    let (new, outcome) = match candidate {
        Some(existing) if existing.taskhash == taskhash => {
            return Ok((existing, MergeOutcome::Existing));
        }
        Some(existing) => {
            debug!(
                method,
                outhash,
                taskhash,
                from_taskhash = %existing.taskhash,
                unihash = %existing.unihash,
                "inheriting unihash from equivalent task"
            );
            let new = NewTaskRecord {
                method: method.to_string(),
                outhash: outhash.to_string(),
                taskhash: taskhash.to_string(),
                unihash: existing.unihash.clone(),
                // Never sort ahead of the record the unihash came from
                created: Utc::now().max(existing.created),
                metadata,
            };
            (new, MergeOutcome::Inherited)
        }
        None => {
            let new = NewTaskRecord {
                method: method.to_string(),
                outhash: outhash.to_string(),
                taskhash: taskhash.to_string(),
                unihash: unihash.to_string(),
                created: Utc::now(),
                metadata,
            };
            (new, MergeOutcome::Created)
        }
    };

    match store.insert(new) {
        Ok(record) => {
            info!(
                method,
                taskhash,
                unihash = %record.unihash,
                "adding taskhash with unihash"
            );
            Ok((record, outcome))
        }
        Err(e) if e.is_duplicate() => {
            debug!(method, outhash, taskhash, "lost insert race, returning stored record");
            let stored = store.get(method, outhash, taskhash)?.ok_or_else(|| {
                HashEquivError::internal(format!(
                    "duplicate reported for {method}:{outhash}:{taskhash} but no record found"
                ))
            })?;
            Ok((stored, MergeOutcome::Existing))
        }
        Err(e) => Err(e.into()),
    }
}

//! Read path: map a taskhash to the unihash it should use.

use tracing::debug;

use crate::error::HashEquivResult;
use crate::record::TaskRecord;
use crate::storage::EquivalenceStore;

/// Return the oldest record for `(method, taskhash)`, if any.
///
/// When one taskhash has been reported with several outhashes, the first
/// report is authoritative, so repeated lookups stay stable.
pub(crate) fn resolve(
    store: &dyn EquivalenceStore,
    method: &str,
    taskhash: &str,
) -> HashEquivResult<Option<TaskRecord>> {
    let found = store.find_oldest_by_taskhash(method, taskhash)?;
    if let Some(ref record) = found {
        debug!(
            method,
            taskhash,
            unihash = %record.unihash,
            "found equivalent task"
        );
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{NewTaskRecord, TaskMetadata};
    use crate::storage::InMemoryEquivalenceStore;
    use chrono::{Duration, Utc};

    fn new_record(outhash: &str, taskhash: &str, unihash: &str, age_secs: i64) -> NewTaskRecord {
        NewTaskRecord {
            method: "TestMethod".to_string(),
            outhash: outhash.to_string(),
            taskhash: taskhash.to_string(),
            unihash: unihash.to_string(),
            created: Utc::now() - Duration::seconds(age_secs),
            metadata: TaskMetadata::default(),
        }
    }

    #[test]
    fn test_resolve_missing_returns_none() {
        let store = InMemoryEquivalenceStore::new();
        assert!(resolve(&store, "TestMethod", "nope").unwrap().is_none());
    }

    #[test]
    fn test_resolve_prefers_oldest_record() {
        let store = InMemoryEquivalenceStore::new();
        store.insert(new_record("o2", "t", "u-new", 0)).unwrap();
        store.insert(new_record("o1", "t", "u-old", 60)).unwrap();

        let found = resolve(&store, "TestMethod", "t").unwrap().unwrap();
        assert_eq!(found.unihash, "u-old");
    }

    #[test]
    fn test_resolve_is_scoped_by_method() {
        let store = InMemoryEquivalenceStore::new();
        store.insert(new_record("o", "t", "u", 0)).unwrap();
        assert!(resolve(&store, "OtherMethod", "t").unwrap().is_none());
    }
}

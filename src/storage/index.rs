//! In-memory record index shared by all backends.
//!
//! Holds the uniqueness constraint on `(method, outhash, taskhash)` and the
//! two secondary access paths, `(method, taskhash)` and `(method, outhash)`.
//! Secondary entries are kept sorted by creation order so "oldest" is the
//! first element of the set.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::record::{NewTaskRecord, RecordId, RecordKey, TaskRecord};
use crate::storage::traits::StorageError;

type Scope = (String, String);
type CreationKey = (DateTime<Utc>, RecordId);

fn scope(method: &str, hash: &str) -> Scope {
    (method.to_string(), hash.to_string())
}

/// Indexed set of task records.
#[derive(Debug, Default, Clone)]
pub struct RecordIndex {
    by_id: BTreeMap<RecordId, TaskRecord>,
    by_key: HashMap<RecordKey, RecordId>,
    by_taskhash: HashMap<Scope, BTreeSet<CreationKey>>,
    by_outhash: HashMap<Scope, BTreeSet<CreationKey>>,
    last_id: u64,
}

impl RecordIndex {
    /// Build an index from an arbitrary collection of records.
    ///
    /// Records whose key is already present are skipped, keeping the first
    /// one seen in creation order.
    pub fn from_records(records: impl IntoIterator<Item = TaskRecord>) -> Self {
        let mut sorted: Vec<TaskRecord> = records.into_iter().collect();
        sorted.sort_by(TaskRecord::creation_order);

        let mut index = Self::default();
        for record in sorted {
            index.apply(record);
        }
        index
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns true if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Highest id assigned so far.
    pub fn last_id(&self) -> u64 {
        self.last_id
    }

    /// Check the uniqueness constraint and build the record that an insert
    /// would store. Does not modify the index.
    pub fn prepare(&self, new: NewTaskRecord) -> Result<TaskRecord, StorageError> {
        let key = RecordKey::new(&new.method, &new.outhash, &new.taskhash);
        if self.by_key.contains_key(&key) {
            return Err(StorageError::DuplicateKey(key.to_string()));
        }
        Ok(TaskRecord::from_new(RecordId(self.last_id + 1), new))
    }

    /// Add a record. Returns false, leaving the index untouched, if its key
    /// or id is already present.
    pub fn apply(&mut self, record: TaskRecord) -> bool {
        let key = record.key();
        if self.by_key.contains_key(&key) || self.by_id.contains_key(&record.id) {
            return false;
        }

        let order = (record.created, record.id);
        self.by_taskhash
            .entry(scope(&record.method, &record.taskhash))
            .or_default()
            .insert(order);
        self.by_outhash
            .entry(scope(&record.method, &record.outhash))
            .or_default()
            .insert(order);
        self.by_key.insert(key, record.id);
        self.last_id = self.last_id.max(record.id.0);
        self.by_id.insert(record.id, record);
        true
    }

    /// Check, assign an id and add in one step.
    pub fn insert(&mut self, new: NewTaskRecord) -> Result<TaskRecord, StorageError> {
        let record = self.prepare(new)?;
        self.apply(record.clone());
        Ok(record)
    }

    /// Exact lookup by unique key.
    pub fn get(&self, method: &str, outhash: &str, taskhash: &str) -> Option<&TaskRecord> {
        let key = RecordKey::new(method, outhash, taskhash);
        self.by_key.get(&key).and_then(|id| self.by_id.get(id))
    }

    /// Oldest record for `(method, taskhash)`.
    pub fn oldest_by_taskhash(&self, method: &str, taskhash: &str) -> Option<&TaskRecord> {
        self.first_in(&self.by_taskhash, method, taskhash)
    }

    /// Oldest record for `(method, outhash)`.
    pub fn oldest_by_outhash(&self, method: &str, outhash: &str) -> Option<&TaskRecord> {
        self.first_in(&self.by_outhash, method, outhash)
    }

    /// Exact-taskhash match within the outhash class, else its oldest member.
    pub fn merge_candidate(&self, method: &str, outhash: &str, taskhash: &str) -> Option<&TaskRecord> {
        self.get(method, outhash, taskhash)
            .or_else(|| self.oldest_by_outhash(method, outhash))
    }

    /// All records of an outhash class, oldest first.
    pub fn by_outhash(&self, method: &str, outhash: &str) -> Vec<TaskRecord> {
        self.by_outhash
            .get(&scope(method, outhash))
            .map(|set| {
                set.iter()
                    .filter_map(|(_, id)| self.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Iterate all records in id order.
    pub fn records(&self) -> impl Iterator<Item = &TaskRecord> {
        self.by_id.values()
    }

    fn first_in(
        &self,
        map: &HashMap<Scope, BTreeSet<CreationKey>>,
        method: &str,
        hash: &str,
    ) -> Option<&TaskRecord> {
        map.get(&scope(method, hash))
            .and_then(|set| set.first())
            .and_then(|(_, id)| self.by_id.get(id))
    }
}

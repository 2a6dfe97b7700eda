//! Task records: the only persisted entity.
//!
//! A `TaskRecord` is one observation of a `(method, outhash, taskhash)`
//! triple together with the unihash of the equivalence class it joined.
//! Records are immutable once stored.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned row identifier.
///
/// Strictly increasing in insertion order; breaks ties between records
/// carrying identical `created` timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Descriptive fields stored verbatim alongside a record.
///
/// Never interpreted by resolution logic. Package fields keep the
/// upper-case `PN`/`PV`/`PR` names clients send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Who reported the observation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Package name.
    #[serde(default, rename = "PN", skip_serializing_if = "Option::is_none")]
    pub pn: Option<String>,
    /// Package version.
    #[serde(default, rename = "PV", skip_serializing_if = "Option::is_none")]
    pub pv: Option<String>,
    /// Package revision.
    #[serde(default, rename = "PR", skip_serializing_if = "Option::is_none")]
    pub pr: Option<String>,
    /// Task name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    /// Output signature information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outhash_siginfo: Option<String>,
}

impl TaskMetadata {
    /// Returns true if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owner.is_none()
            && self.pn.is_none()
            && self.pv.is_none()
            && self.pr.is_none()
            && self.task.is_none()
            && self.outhash_siginfo.is_none()
    }
}

/// A record about to be inserted; the store assigns its `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTaskRecord {
    /// Hashing method name.
    pub method: String,
    /// Hash of the task's output.
    pub outhash: String,
    /// Hash of the task's inputs.
    pub taskhash: String,
    /// Canonical identifier of the equivalence class.
    pub unihash: String,
    /// Creation time; orders records within a class.
    pub created: DateTime<Utc>,
    /// Optional descriptive fields.
    pub metadata: TaskMetadata,
}

/// A stored task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Row identifier assigned at insert.
    pub id: RecordId,
    /// Hashing scheme; distinct methods never share equivalence classes.
    pub method: String,
    /// Hash of the task's produced output.
    pub outhash: String,
    /// Hash of the task's inputs.
    pub taskhash: String,
    /// Canonical identifier of the equivalence class.
    pub unihash: String,
    /// When the record was created. Never updated.
    pub created: DateTime<Utc>,
    /// Optional descriptive fields.
    #[serde(default)]
    pub metadata: TaskMetadata,
}

impl TaskRecord {
    /// Materialize a pending record with its assigned id.
    #[must_use]
    pub fn from_new(id: RecordId, new: NewTaskRecord) -> Self {
        Self {
            id,
            method: new.method,
            outhash: new.outhash,
            taskhash: new.taskhash,
            unihash: new.unihash,
            created: new.created,
            metadata: new.metadata,
        }
    }

    /// The uniqueness key of this record.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.method, &self.outhash, &self.taskhash)
    }

    /// Creation order: earliest `created` first, then lowest `id`.
    #[must_use]
    pub fn creation_order(&self, other: &Self) -> Ordering {
        self.created
            .cmp(&other.created)
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Project to the externally visible triple.
    #[must_use]
    pub fn equivalence(&self) -> Equivalence {
        Equivalence {
            taskhash: self.taskhash.clone(),
            method: self.method.clone(),
            unihash: self.unihash.clone(),
        }
    }
}

/// Uniqueness key `(method, outhash, taskhash)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    /// Hashing method name.
    pub method: String,
    /// Output hash.
    pub outhash: String,
    /// Input hash.
    pub taskhash: String,
}

impl RecordKey {
    /// Build a key from borrowed parts.
    #[must_use]
    pub fn new(method: &str, outhash: &str, taskhash: &str) -> Self {
        Self {
            method: method.to_string(),
            outhash: outhash.to_string(),
            taskhash: taskhash.to_string(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.method, self.outhash, self.taskhash)
    }
}

/// The three-field projection returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equivalence {
    /// The taskhash that was looked up or reported.
    pub taskhash: String,
    /// Hashing method name.
    pub method: String,
    /// Unihash shared by the taskhash's class.
    pub unihash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: u64, created: DateTime<Utc>) -> TaskRecord {
        TaskRecord {
            id: RecordId(id),
            method: "m".to_string(),
            outhash: "o".to_string(),
            taskhash: "t".to_string(),
            unihash: "u".to_string(),
            created,
            metadata: TaskMetadata::default(),
        }
    }

    #[test]
    fn test_creation_order_prefers_timestamp_then_id() {
        let now = Utc::now();
        let older = record(9, now - Duration::seconds(1));
        let newer = record(1, now);
        assert_eq!(older.creation_order(&newer), Ordering::Less);

        let a = record(1, now);
        let b = record(2, now);
        assert_eq!(a.creation_order(&b), Ordering::Less);
        assert_eq!(b.creation_order(&a), Ordering::Greater);
    }

    #[test]
    fn test_equivalence_projection() {
        let r = record(1, Utc::now());
        let eq = r.equivalence();
        assert_eq!(eq.taskhash, "t");
        assert_eq!(eq.method, "m");
        assert_eq!(eq.unihash, "u");
    }

    #[test]
    fn test_metadata_package_field_names() {
        let meta: TaskMetadata =
            serde_json::from_str(r#"{"PN":"zlib","PV":"1.3","PR":"r0","task":"do_install"}"#).unwrap();
        assert_eq!(meta.pn.as_deref(), Some("zlib"));
        assert_eq!(meta.pv.as_deref(), Some("1.3"));
        assert_eq!(meta.pr.as_deref(), Some("r0"));
        assert_eq!(meta.task.as_deref(), Some("do_install"));
        assert!(meta.owner.is_none());
    }

    #[test]
    fn test_metadata_omits_unset_fields() {
        let meta = TaskMetadata {
            owner: Some("builder".to_string()),
            ..TaskMetadata::default()
        };
        assert!(!meta.is_empty());
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"owner":"builder"}"#);
        assert!(TaskMetadata::default().is_empty());
    }
}

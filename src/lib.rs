//! # hashequiv - Task Output Hash Equivalence Server
//!
//! Build systems hash a task's inputs (the *taskhash*) and its outputs (the
//! *outhash*). Different inputs sometimes produce bit-identical outputs;
//! hashequiv records those observations and hands every member of an
//! equivalence class the same canonical identifier, the *unihash*, so
//! downstream tasks can be reused instead of rebuilt.
//!
//! ## Core Concepts
//!
//! - **TaskRecord**: one observation of `(method, outhash, taskhash)` and the
//!   unihash it joined
//! - **Lookup**: taskhash to the unihash of its oldest record
//! - **Merge**: record an outhash, inheriting an existing unihash when another
//!   taskhash already produced the same output
//! - **EquivalenceStore**: pluggable durable storage (in-memory or persistent)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hashequiv::{EquivalenceEngine, InMemoryEquivalenceStore, TaskMetadata};
//!
//! let engine = EquivalenceEngine::new(Arc::new(InMemoryEquivalenceStore::new()));
//! engine.merge("TestMethod", "out", "task-a", "uni-a", TaskMetadata::default())?;
//! let merged = engine.merge("TestMethod", "out", "task-b", "uni-b", TaskMetadata::default())?;
//! assert_eq!(merged.unihash, "uni-a");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod engine;
pub mod error;
pub mod record;
pub mod request;
pub mod storage;

#[cfg(feature = "persistent")]
pub mod config;

#[cfg(feature = "transport-grpc")]
pub mod transport;

pub use engine::{EquivalenceEngine, MergeOutcome};
pub use error::{
    ExecutionError, HashEquivError, HashEquivResult, TransportError, ValidationError,
};
pub use record::{Equivalence, NewTaskRecord, RecordId, RecordKey, TaskMetadata, TaskRecord};
pub use request::{GetEquivalentRequest, ReportEquivalentRequest};
pub use storage::{EquivalenceStore, InMemoryEquivalenceStore, OuthashLocks, StorageError};

#[cfg(feature = "persistent")]
pub use storage::{open_database, PersistentConfig, PersistentEquivalenceStore};

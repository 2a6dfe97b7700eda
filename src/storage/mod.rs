//! Storage layer for hashequiv.
//!
//! `EquivalenceStore` is the abstract interface the engine depends on.
//! Backends:
//! - `InMemoryEquivalenceStore` (always available)
//! - `PersistentEquivalenceStore` (feature `persistent`)

mod guard;
mod index;
mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use guard::{OuthashGuard, OuthashLocks};
pub use index::RecordIndex;
pub use memory::InMemoryEquivalenceStore;
pub use traits::{EquivalenceStore, StorageError};

#[cfg(feature = "persistent")]
pub use persistent::{open_database, PersistentConfig, PersistentEquivalenceStore};

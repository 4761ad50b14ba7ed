//! Versioned entity store for the Firelet policy tables.
//!
//! This module provides the [`EntityStore`] (working state plus commit
//! history), the content tokens that guard every update, the repository
//! backends that persist snapshots, and the cross-process repository lock.

mod entity_store;
mod git;
mod lock;
mod memory;
mod repository;
mod token;

pub use entity_store::{ChangeKind, EntityStore, Record, RecordChange, VersionDiff};
pub use git::GitRepository;
pub use lock::{generate_holder_id, LockInfo, RepositoryLock, LOCK_EXPIRY_SECS};
pub use memory::MemoryRepository;
pub use repository::{decode_fireset, encode_fireset, table_file, CommitInfo, PolicyRepository};
pub use token::TokenHasher;

//! # Key-Value Storage
//!
//! This crate defines the persistence boundary of the kernel.
//!
//! ## Philosophy
//!
//! **The kernel owns its data model; the store only owns bytes.**
//!
//! The kernel store encodes all of its state as string keys and values over a
//! deliberately narrow contract (get, set, delete, next-key). Any engine that
//! satisfies [`KeyValueStore`] is acceptable:
//! - [`MemoryKvStore`]: auto-commit, in memory, for tests and ephemeral kernels
//! - [`JournaledKvStore`]: transactional, journaled, crash-consistent, and
//!   optionally backed by a file

pub mod journaled_storage;
pub mod store;
pub mod transaction;

pub use journaled_storage::{JournalEntry, JournaledKvStore};
pub use store::{KeyValueStore, MemoryKvStore};
pub use transaction::{Transaction, TransactionError, TransactionId, TransactionState};

use thiserror::Error;

/// Errors from the storage layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KvError {
    #[error("required key {0} is missing")]
    MissingKey(String),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("codec error: {0}")]
    Codec(String),
}

//! The storage seam.
//!
//! The node only talks to its transactional store through [`Engine`] and
//! [`Transaction`]. The engine owns isolation: it decides when two
//! transactions conflict and reports that at commit time (or earlier, from
//! `get`/`put`, for lock-timeout style failures). The executor never
//! inspects stored data outside a transaction.
//!
//! [`MemoryEngine`] is the in-process backend the binary runs against.

pub mod memory;

use serde_json::Value;
use thiserror::Error;

pub use memory::{FaultConfig, IsolationLevel, MemoryEngine};

/// Result of asking the engine to commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Durably committed; effects are visible to later transactions.
    Committed,
    /// Definitely not committed because of a concurrent transaction. Safe to retry.
    Conflict,
    /// The engine cannot say whether the commit happened.
    Indeterminate,
}

/// Failures surfaced by `begin`, `get` or `put` before commit is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Optimistic-concurrency or lock-timeout class failure.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// Anything else the engine cannot recover from for this transaction.
    #[error("storage failure: {0}")]
    Failure(String),
}

/// A transactional key-value engine shared by every request handler.
pub trait Engine: Send + Sync + 'static {
    type Txn: Transaction;

    /// Opens a new transaction.
    fn begin(&self) -> Result<Self::Txn, StoreError>;
}

/// One open transaction.
///
/// `get` must observe this transaction's own earlier `put`s. Dropping a
/// transaction without committing behaves like [`Transaction::abort`].
pub trait Transaction: Send {
    fn get(&mut self, key: &str) -> Result<Option<Value>, StoreError>;

    fn put(&mut self, key: &str, value: Value) -> Result<(), StoreError>;

    fn commit(self) -> CommitOutcome;

    fn abort(self);
}

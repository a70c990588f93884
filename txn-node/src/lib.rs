//! A Maelstrom conformance node backed by a transactional key-value store.
//!
//! The node speaks Maelstrom's line-delimited JSON protocol on stdin/stdout
//! and serves the lin-kv, bank and txn workloads. Every workload request runs
//! as a storage transaction with a bounded number of retries on conflict.
//!
//! - [`message`] defines the envelope, the tagged bodies and the codec.
//! - [`channel`] reads request lines and serializes reply writes.
//! - [`identity`] holds the node identity assigned by `init`.
//! - [`workload`] validates request bodies into typed operations.
//! - [`executor`] runs operations against a [`store::Engine`] with retry.
//! - [`dispatch`] routes one request body to its handler.
//! - [`reply`] builds correlated reply envelopes.
//! - [`node`] ties these together into the main loop.
//! - [`store`] holds the engine traits and the in-memory MVCC engine.
//! - [`cli`] and [`config`] cover the command line and runtime settings.

pub mod channel;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod identity;
pub mod message;
pub mod node;
pub mod reply;
pub mod store;
pub mod workload;

//! Core types and traits for the ledger node.
//!
//! This crate provides the operation model staged by two-phase-commit
//! transactions, the `AuditSink` trait and the error types shared by the node
//! and its audit backends, so that sinks can live in separate crates.

pub mod audit;
pub mod models;
pub mod storage;

// Re-export key types at crate root for convenience
pub use audit::{AuditError, AuditSink, DisabledAuditSink, MemoryAuditSink};
pub use models::{AccountId, TxId};
pub use models::read::{AuditKind, AuditRecord};
pub use models::write::{Operation, PreparedTransaction};
pub use storage::StorageError;

//! Worker node of a two-phase-commit ledger.
//!
//! The node owns one partition of accounts. A coordinator drives each
//! transaction through PREPARE and then COMMIT or ABORT over a line-oriented
//! JSON protocol; clients may also query single balances or the partition sum.
//!
//! - [`storage`] - the in-memory ledger and its durable `id,balance` file
//! - [`registry`] - prepared transactions awaiting resolution
//! - [`engine`] - the PREPARE/COMMIT/ABORT state machine
//! - [`protocol`] - request decoding and response encoding
//! - [`server`] - per-connection handling and the accept loop

pub mod config;
pub mod engine;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod storage;
pub mod telemetry;

pub use engine::ProtocolEngine;
pub use protocol::{ProtocolError, Request, Response, Status};
pub use storage::LedgerStore;

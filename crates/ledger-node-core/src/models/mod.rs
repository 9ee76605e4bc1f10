use std::sync::Arc;

pub mod read;
pub mod write;

/// Account identifier within a partition.
pub type AccountId = i64;

/// Caller-supplied transaction identifier. Uniqueness is the coordinator's job.
pub type TxId = Arc<str>;

use thiserror::Error;

use crate::models::AccountId;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("balance of account {0} out of range")]
    BalanceOverflow(AccountId),
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),
}

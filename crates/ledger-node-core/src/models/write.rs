use rust_decimal::Decimal;

use super::{AccountId, TxId};

/// A single ledger mutation staged by PREPARE and applied on COMMIT.
///
/// Amounts are never negative; direction is carried by the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Debit { account: AccountId, amount: Decimal },
    Credit { account: AccountId, amount: Decimal },
    CreateAccount { account: AccountId, initial_balance: Decimal },
    DeleteAccount { account: AccountId },
}

impl Operation {
    pub fn account(&self) -> AccountId {
        match self {
            Operation::Debit { account, .. }
            | Operation::Credit { account, .. }
            | Operation::CreateAccount { account, .. }
            | Operation::DeleteAccount { account } => *account,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTransaction {
    pub tx_id: TxId,
    pub operations: Vec<Operation>,
}

impl PreparedTransaction {
    pub fn new(tx_id: TxId, operations: Vec<Operation>) -> Self {
        Self { tx_id, operations }
    }

    /// A transaction whose accounts all live on other partitions.
    pub fn is_noop(&self) -> bool {
        self.operations.is_empty()
    }
}

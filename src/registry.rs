use std::collections::HashMap;

use ledger_node_core::{PreparedTransaction, TxId};

/// Prepared transactions awaiting COMMIT or ABORT. Volatile: nothing here
/// survives a restart.
#[derive(Debug, Default)]
pub struct TransactionRegistry {
    prepared: HashMap<TxId, PreparedTransaction>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `transaction`, replacing any entry with the same id.
    pub fn insert(&mut self, transaction: PreparedTransaction) -> Option<PreparedTransaction> {
        self.prepared.insert(transaction.tx_id.clone(), transaction)
    }

    /// Removes and returns the entry for `tx_id`.
    pub fn take(&mut self, tx_id: &str) -> Option<PreparedTransaction> {
        self.prepared.remove(tx_id)
    }

    pub fn get(&self, tx_id: &str) -> Option<&PreparedTransaction> {
        self.prepared.get(tx_id)
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.prepared.contains_key(tx_id)
    }

    pub fn len(&self) -> usize {
        self.prepared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prepared.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_node_core::Operation;
    use rust_decimal_macros::dec;

    #[test]
    fn test_insert_overwrites_same_tx_id() {
        let mut registry = TransactionRegistry::new();
        registry.insert(PreparedTransaction::new("t1".into(), vec![]));
        let previous = registry.insert(PreparedTransaction::new(
            "t1".into(),
            vec![Operation::Credit { account: 1, amount: dec!(5) }],
        ));

        assert!(previous.unwrap().is_noop());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("t1").unwrap().operations.len(), 1);
    }

    #[test]
    fn test_take_removes_entry() {
        let mut registry = TransactionRegistry::new();
        registry.insert(PreparedTransaction::new("t1".into(), vec![]));

        assert!(registry.take("t1").is_some());
        assert!(registry.take("t1").is_none());
        assert!(!registry.contains("t1"));
        assert!(registry.is_empty());
    }
}

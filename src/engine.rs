use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use rust_decimal::Decimal;
use time::OffsetDateTime;

use ledger_node_core::{AccountId, AuditRecord, AuditSink, Operation, PreparedTransaction, TxId};

use crate::{
    protocol::{ProtocolError, Request, Response},
    registry::TransactionRegistry,
    storage::{LedgerStore, StorageError},
};

/// Ledger and registry are only ever touched together, under one lock.
struct NodeState {
    ledger: LedgerStore,
    registry: TransactionRegistry,
}

/// Two-phase-commit participant for one ledger partition.
///
/// Every transition, reads included, runs under a single mutex so the
/// observable effects of PREPARE, COMMIT, ABORT and the queries are
/// linearizable. Prepared transactions never expire; the coordinator must
/// resolve each one.
pub struct ProtocolEngine {
    state: Mutex<NodeState>,
    data_file: PathBuf,
    audit: Arc<dyn AuditSink>,
}

impl ProtocolEngine {
    pub fn new(ledger: LedgerStore, data_file: impl Into<PathBuf>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            state: Mutex::new(NodeState {
                ledger,
                registry: TransactionRegistry::new(),
            }),
            data_file: data_file.into(),
            audit,
        }
    }

    /// Loads the ledger from `data_file` and builds an engine over it.
    pub fn open(data_file: impl Into<PathBuf>, audit: Arc<dyn AuditSink>) -> Result<Self, StorageError> {
        let data_file = data_file.into();
        let ledger = LedgerStore::load(&data_file)?;
        Ok(Self::new(ledger, data_file, audit))
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        // A panic mid-transition cannot leave a half-applied commit behind: the
        // ledger is only swapped after a successful save.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn prepare_transfer(&self, tx_id: TxId, from: AccountId, to: AccountId, amount: Decimal) -> Result<(), ProtocolError> {
        let mut state = self.state();
        let mut operations = Vec::with_capacity(2);

        if let Ok(balance) = state.ledger.get(from) {
            if balance < amount {
                tracing::info!(%tx_id, from, %balance, %amount, "Transfer refused: insufficient funds");
                metrics::increment_counter!("ledger_node_prepare_total", "outcome" => "refused");
                return Err(ProtocolError::InsufficientFunds);
            }
            operations.push(Operation::Debit { account: from, amount });
        }
        if let Ok(balance) = state.ledger.get(to) {
            if balance.checked_add(amount).is_none() {
                tracing::info!(%tx_id, to, %balance, %amount, "Transfer refused: credit out of range");
                metrics::increment_counter!("ledger_node_prepare_total", "outcome" => "refused");
                return Err(ProtocolError::BalanceOverflow);
            }
            operations.push(Operation::Credit { account: to, amount });
        }

        Self::stage(&mut state, PreparedTransaction::new(tx_id, operations));
        Ok(())
    }

    pub fn prepare_create(&self, tx_id: TxId, account: AccountId, initial_balance: Decimal) -> Result<(), ProtocolError> {
        let mut state = self.state();
        if state.ledger.contains(account) {
            metrics::increment_counter!("ledger_node_prepare_total", "outcome" => "refused");
            return Err(ProtocolError::AccountAlreadyExists);
        }

        let operations = vec![Operation::CreateAccount { account, initial_balance }];
        Self::stage(&mut state, PreparedTransaction::new(tx_id, operations));
        Ok(())
    }

    pub fn prepare_delete(&self, tx_id: TxId, account: AccountId) -> Result<(), ProtocolError> {
        let mut state = self.state();
        if !state.ledger.contains(account) {
            metrics::increment_counter!("ledger_node_prepare_total", "outcome" => "refused");
            return Err(ProtocolError::AccountDoesNotExist);
        }

        let operations = vec![Operation::DeleteAccount { account }];
        Self::stage(&mut state, PreparedTransaction::new(tx_id, operations));
        Ok(())
    }

    fn stage(state: &mut NodeState, transaction: PreparedTransaction) {
        let tx_id = transaction.tx_id.clone();
        let operations = transaction.operations.len();
        if state.registry.insert(transaction).is_some() {
            tracing::warn!(%tx_id, "Prepared transaction replaced by a new PREPARE with the same id");
        }
        tracing::debug!(%tx_id, operations, "Transaction prepared");
        metrics::increment_counter!("ledger_node_prepare_total", "outcome" => "ready");
        metrics::gauge!("ledger_node_pending_transactions", state.registry.len() as f64);
    }

    /// Applies a prepared transaction and persists the ledger.
    ///
    /// Operations are applied to a staged copy that replaces the live ledger
    /// only once the save succeeds. The registry entry is consumed either way.
    /// Audit records are written after the lock is released.
    pub fn commit(&self, tx_id: &str) -> Result<(), ProtocolError> {
        let records = {
            let mut state = self.state();
            let transaction = state.registry.take(tx_id).ok_or_else(|| {
                metrics::increment_counter!("ledger_node_commit_total", "outcome" => "not_prepared");
                ProtocolError::NotPrepared
            })?;
            metrics::gauge!("ledger_node_pending_transactions", state.registry.len() as f64);

            let now = OffsetDateTime::now_utc();
            let mut staged = state.ledger.clone();
            let mut records: Vec<AuditRecord> = Vec::with_capacity(transaction.operations.len());
            for operation in &transaction.operations {
                match staged.apply(operation, now) {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(tx_id, error = %e, "Commit rejected, ledger left unchanged");
                        metrics::increment_counter!("ledger_node_commit_total", "outcome" => "out_of_range");
                        return Err(ProtocolError::BalanceOverflow);
                    }
                }
            }

            if let Err(e) = staged.save(&self.data_file) {
                tracing::error!(tx_id, error = %e, "Failed to persist ledger on commit");
                metrics::increment_counter!("ledger_node_commit_total", "outcome" => "persist_fail");
                return Err(ProtocolError::PersistFailed);
            }

            state.ledger = staged;
            records
        };

        tracing::debug!(tx_id, operations = records.len(), "Transaction committed");
        metrics::increment_counter!("ledger_node_commit_total", "outcome" => "committed");

        for record in &records {
            if let Err(e) = self.audit.record(record) {
                tracing::warn!(tx_id, account = record.account, error = %e, "Audit record dropped");
            }
        }
        Ok(())
    }

    /// Discards any prepared transaction for `tx_id`. Returns whether one existed.
    pub fn abort(&self, tx_id: &str) -> bool {
        let mut state = self.state();
        let discarded = state.registry.take(tx_id).is_some();
        metrics::increment_counter!("ledger_node_abort_total");
        metrics::gauge!("ledger_node_pending_transactions", state.registry.len() as f64);
        tracing::debug!(tx_id, discarded, "Transaction aborted");
        discarded
    }

    pub fn balance(&self, account: AccountId) -> Result<Decimal, ProtocolError> {
        self.state()
            .ledger
            .get(account)
            .map_err(|_| ProtocolError::AccountNotFound)
    }

    pub fn partition_sum(&self) -> Result<Decimal, ProtocolError> {
        self.state().ledger.sum().ok_or_else(|| {
            tracing::warn!("Partition sum out of range");
            ProtocolError::BalanceOverflow
        })
    }

    pub fn account_count(&self) -> usize {
        self.state().ledger.len()
    }

    pub fn pending_transactions(&self) -> usize {
        self.state().registry.len()
    }

    pub fn is_prepared(&self, tx_id: &str) -> bool {
        self.state().registry.contains(tx_id)
    }

    /// Runs `request` and builds the single response for it.
    pub fn execute(&self, request: &Request) -> Response {
        match request {
            Request::PrepareTransfer { tx_id, from, to, amount } => self
                .prepare_transfer(tx_id.clone(), *from, *to, *amount)
                .map(|_| Response::ready(tx_id.clone()))
                .unwrap_or_else(|e| Response::error(Some(tx_id.clone()), &e)),
            Request::PrepareCreate { tx_id, account, initial_balance } => self
                .prepare_create(tx_id.clone(), *account, *initial_balance)
                .map(|_| Response::ready(tx_id.clone()))
                .unwrap_or_else(|e| Response::error(Some(tx_id.clone()), &e)),
            Request::PrepareDelete { tx_id, account } => self
                .prepare_delete(tx_id.clone(), *account)
                .map(|_| Response::ready(tx_id.clone()))
                .unwrap_or_else(|e| Response::error(Some(tx_id.clone()), &e)),
            Request::Commit { tx_id: Some(tx_id) } => self
                .commit(tx_id)
                .map(|_| Response::committed(tx_id.clone()))
                .unwrap_or_else(|e| Response::error(Some(tx_id.clone()), &e)),
            Request::Commit { tx_id: None } => Response::error(None, &ProtocolError::NotPrepared),
            Request::Abort { tx_id } => {
                if let Some(tx_id) = tx_id {
                    self.abort(tx_id);
                }
                Response::aborted(tx_id.clone())
            }
            Request::QueryAccount { account } => self
                .balance(*account)
                .map(|balance| Response::balance(*account, balance))
                .unwrap_or_else(|e| Response::error(None, &e)),
            Request::SumPartition => self
                .partition_sum()
                .map(Response::sum)
                .unwrap_or_else(|e| Response::error(None, &e)),
        }
    }
}

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, ErrorKind, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use rust_decimal::{Decimal, RoundingStrategy};
use time::OffsetDateTime;

use ledger_node_core::{AccountId, AuditRecord, Operation};

// Re-export core storage types so callers can use crate::storage::*
pub use ledger_node_core::storage::StorageError;

/// Balances owned by this partition, keyed by account id.
///
/// Kept in a `BTreeMap` so the durable file is always written in id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerStore {
    accounts: BTreeMap<AccountId, Decimal>,
}

impl FromIterator<(AccountId, Decimal)> for LedgerStore {
    fn from_iter<T: IntoIterator<Item = (AccountId, Decimal)>>(iter: T) -> Self {
        Self {
            accounts: iter.into_iter().collect(),
        }
    }
}

impl LedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `id,balance` lines from `path`.
    ///
    /// Malformed lines are skipped with a warning. A missing file yields an
    /// empty ledger and is created, along with its parent directory.
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        tracing::info!(path = %path.display(), "Loading ledger");

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Ledger file not found, creating an empty one");
                ensure_parent_dir(path)?;
                File::create(path)?;
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut ledger = Self::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Some((id, balance)) => {
                    ledger.accounts.insert(id, balance);
                }
                None => tracing::warn!(line, "Skipping malformed ledger line"),
            }
        }

        tracing::info!(accounts = ledger.len(), "Ledger loaded");
        Ok(ledger)
    }

    /// Rewrites `path` with the full ledger, balances to two decimals.
    ///
    /// The content goes to a sibling temporary file that is synced and then
    /// renamed over `path`. The temporary file is removed if any step fails.
    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        ensure_parent_dir(path)?;
        let temp_path = temp_path_for(path);

        let result = self
            .write_synced(&temp_path)
            .and_then(|_| fs::rename(&temp_path, path).map_err(StorageError::from));
        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_file(&temp_path) {
                if cleanup.kind() != ErrorKind::NotFound {
                    tracing::warn!(path = %temp_path.display(), error = %cleanup, "Failed to remove temporary ledger file");
                }
            }
            return Err(e);
        }

        tracing::debug!(path = %path.display(), accounts = self.len(), "Ledger persisted");
        Ok(())
    }

    fn write_synced(&self, temp_path: &Path) -> Result<(), StorageError> {
        let file = File::create(temp_path)?;
        let mut writer = BufWriter::new(file);
        for (id, balance) in &self.accounts {
            writeln!(writer, "{},{}", id, format_balance(*balance))?;
        }
        let file = writer
            .into_inner()
            .map_err(|e| StorageError::IOError(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    }

    pub fn get(&self, id: AccountId) -> Result<Decimal, StorageError> {
        self.accounts
            .get(&id)
            .copied()
            .ok_or(StorageError::AccountNotFound(id))
    }

    pub fn contains(&self, id: AccountId) -> bool {
        self.accounts.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Partition total used for reconciliation (arqueo). `None` when the
    /// total does not fit in a `Decimal`.
    pub fn sum(&self) -> Option<Decimal> {
        self.accounts
            .values()
            .try_fold(Decimal::ZERO, |total, balance| total.checked_add(*balance))
    }

    pub fn iter(&self) -> impl Iterator<Item = (AccountId, Decimal)> + '_ {
        self.accounts.iter().map(|(id, balance)| (*id, *balance))
    }

    /// Applies one staged operation, returning the audit record for it.
    ///
    /// Debits and credits against an account that no longer exists are
    /// skipped and produce no record. A debit or credit whose result does not
    /// fit in a `Decimal` fails and leaves the balance untouched.
    pub fn apply(&mut self, operation: &Operation, now: OffsetDateTime) -> Result<Option<AuditRecord>, StorageError> {
        match operation {
            Operation::Debit { account, amount } => {
                let Some(balance) = self.accounts.get_mut(account) else {
                    tracing::warn!(account, "Debit target vanished before commit, skipping");
                    return Ok(None);
                };
                *balance = balance
                    .checked_sub(*amount)
                    .ok_or(StorageError::BalanceOverflow(*account))?;
            }
            Operation::Credit { account, amount } => {
                let Some(balance) = self.accounts.get_mut(account) else {
                    tracing::warn!(account, "Credit target vanished before commit, skipping");
                    return Ok(None);
                };
                *balance = balance
                    .checked_add(*amount)
                    .ok_or(StorageError::BalanceOverflow(*account))?;
            }
            Operation::CreateAccount { account, initial_balance } => {
                if self.accounts.insert(*account, *initial_balance).is_some() {
                    tracing::warn!(account, "Account created twice, previous balance replaced");
                }
            }
            Operation::DeleteAccount { account } => {
                if self.accounts.remove(account).is_none() {
                    tracing::warn!(account, "Account already deleted, skipping");
                    return Ok(None);
                }
            }
        }

        Ok(Some(AuditRecord::for_operation(operation, now)))
    }
}

fn parse_line(line: &str) -> Option<(AccountId, Decimal)> {
    let mut parts = line.split(',');
    let (id, balance) = match (parts.next(), parts.next(), parts.next()) {
        (Some(id), Some(balance), None) => (id.trim(), balance.trim()),
        _ => return None,
    };

    let id = id.parse::<AccountId>().ok()?;
    let balance = Decimal::from_str(balance)
        .or_else(|_| Decimal::from_scientific(balance))
        .ok()?;
    Some((id, balance))
}

fn format_balance(balance: Decimal) -> String {
    let rounded = balance.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    format!("{:.2}", rounded)
}

fn ensure_parent_dir(path: &Path) -> Result<(), StorageError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent)?;
            Ok(())
        }
        _ => Ok(()),
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> LedgerStore {
        LedgerStore::from_iter([(1, dec!(100.00)), (2, dec!(50.00)), (3, dec!(-4.25))])
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cuentas.txt");

        let ledger = sample();
        ledger.save(&path).unwrap();
        let loaded = LedgerStore::load(&path).unwrap();

        assert_eq!(loaded, ledger);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "1,100.00\n2,50.00\n3,-4.25\n"
        );
    }

    #[test]
    fn test_save_formats_two_decimals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cuentas.txt");

        LedgerStore::from_iter([(5, dec!(7)), (6, dec!(1.005)), (7, dec!(0.1))])
            .save(&path)
            .unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "5,7.00\n6,1.01\n7,0.10\n"
        );
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn test_load_missing_file_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("part0").join("cuentas.txt");

        let ledger = LedgerStore::load(&path).unwrap();

        assert!(ledger.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_load_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cuentas.txt");
        fs::write(
            &path,
            "1,100.50\n\nnot-a-line\n2,abc\nx,5\n3,1,2\n 4 , 20 \n",
        )
        .unwrap();

        let ledger = LedgerStore::load(&path).unwrap();

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.get(1).unwrap(), dec!(100.50));
        assert_eq!(ledger.get(4).unwrap(), dec!(20));
    }

    #[test]
    fn test_get_missing_account() {
        let ledger = sample();
        assert!(matches!(ledger.get(999), Err(StorageError::AccountNotFound(999))));
    }

    #[test]
    fn test_sum() {
        assert_eq!(sample().sum(), Some(dec!(145.75)));
        assert_eq!(LedgerStore::new().sum(), Some(Decimal::ZERO));
    }

    #[test]
    fn test_sum_out_of_range() {
        let ledger = LedgerStore::from_iter([(1, Decimal::MAX), (2, Decimal::MAX)]);
        assert_eq!(ledger.sum(), None);

        let balanced = LedgerStore::from_iter([(1, Decimal::MAX), (2, Decimal::MIN)]);
        assert_eq!(balanced.sum(), Some(Decimal::ZERO));
    }

    #[test]
    fn test_apply_operations() {
        let mut ledger = sample();
        let now = OffsetDateTime::now_utc();

        let debit = ledger.apply(&Operation::Debit { account: 1, amount: dec!(30) }, now).unwrap().unwrap();
        ledger.apply(&Operation::Credit { account: 2, amount: dec!(30) }, now).unwrap().unwrap();
        ledger.apply(&Operation::CreateAccount { account: 10, initial_balance: dec!(5) }, now).unwrap().unwrap();
        ledger.apply(&Operation::DeleteAccount { account: 3 }, now).unwrap().unwrap();

        assert_eq!(debit.amount, dec!(-30));
        assert_eq!(ledger.get(1).unwrap(), dec!(70));
        assert_eq!(ledger.get(2).unwrap(), dec!(80));
        assert_eq!(ledger.get(10).unwrap(), dec!(5));
        assert!(!ledger.contains(3));
    }

    #[test]
    fn test_apply_to_vanished_account_is_skipped() {
        let mut ledger = sample();
        let now = OffsetDateTime::now_utc();

        assert!(ledger.apply(&Operation::Credit { account: 42, amount: dec!(1) }, now).unwrap().is_none());
        assert!(ledger.apply(&Operation::DeleteAccount { account: 42 }, now).unwrap().is_none());
        assert_eq!(ledger, sample());
    }

    #[test]
    fn test_apply_out_of_range_keeps_balance() {
        let mut ledger = LedgerStore::from_iter([(1, Decimal::MAX), (2, Decimal::MIN)]);
        let now = OffsetDateTime::now_utc();

        assert!(matches!(
            ledger.apply(&Operation::Credit { account: 1, amount: dec!(1) }, now),
            Err(StorageError::BalanceOverflow(1))
        ));
        assert!(matches!(
            ledger.apply(&Operation::Debit { account: 2, amount: dec!(1) }, now),
            Err(StorageError::BalanceOverflow(2))
        ));
        assert_eq!(ledger.get(1).unwrap(), Decimal::MAX);
        assert_eq!(ledger.get(2).unwrap(), Decimal::MIN);
    }

    #[test]
    fn test_failed_save_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // A directory at the target path makes the final rename fail.
        let path = dir.path().join("cuentas.txt");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), "").unwrap();

        assert!(sample().save(&path).is_err());
        assert!(!temp_path_for(&path).exists());
        assert!(path.is_dir());
    }
}

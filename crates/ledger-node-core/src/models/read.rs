use std::fmt::Display;

use rust_decimal::Decimal;
use time::OffsetDateTime;

use super::{write::Operation, AccountId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditKind {
    Debit,
    Credit,
    AccountCreated,
    AccountDeleted,
}

impl AuditKind {
    /// Label stored in the audit table's `tipo` column.
    pub fn label(&self) -> &'static str {
        match self {
            AuditKind::Debit => "Débito",
            AuditKind::Credit => "Crédito",
            AuditKind::AccountCreated => "Creación de cuenta",
            AuditKind::AccountDeleted => "Eliminación de cuenta",
        }
    }
}

impl Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One applied operation, as written to the audit sink. `amount` is signed:
/// debits are negative.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub account: AccountId,
    pub kind: AuditKind,
    pub amount: Decimal,
    pub recorded_at: OffsetDateTime,
}

impl AuditRecord {
    pub fn for_operation(operation: &Operation, recorded_at: OffsetDateTime) -> Self {
        let (kind, amount) = match operation {
            Operation::Debit { amount, .. } => (AuditKind::Debit, -*amount),
            Operation::Credit { amount, .. } => (AuditKind::Credit, *amount),
            Operation::CreateAccount { initial_balance, .. } => (AuditKind::AccountCreated, *initial_balance),
            Operation::DeleteAccount { .. } => (AuditKind::AccountDeleted, Decimal::ZERO),
        };

        Self {
            account: operation.account(),
            kind,
            amount,
            recorded_at,
        }
    }
}

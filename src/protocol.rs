//! Line-oriented JSON requests and responses exchanged with the coordinator.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use ledger_node_core::{AccountId, TxId};

/// Failures reported back to the caller as `{"status":"ERROR"}`.
///
/// The `Display` text is the `error` field on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Saldo insuficiente")]
    InsufficientFunds,
    #[error("COMMIT_FAIL: Transacción no preparada")]
    NotPrepared,
    #[error("PERSIST_FAIL")]
    PersistFailed,
    #[error("NO_EXISTE_CUENTA")]
    AccountNotFound,
    #[error("Cuenta ya existe")]
    AccountAlreadyExists,
    #[error("Cuenta no existe")]
    AccountDoesNotExist,
    #[error("Falta tx_id")]
    MissingTxId,
    #[error("TIPO_DESCONOCIDO")]
    UnknownType,
    #[error("PETICION_INVALIDA: {0}")]
    InvalidRequest(String),
    #[error("SALDO_FUERA_DE_RANGO")]
    BalanceOverflow,
    #[error("ERROR_INTERNO")]
    Internal,
}

/// A line that is not a JSON object. Logged, never answered.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("request is not a JSON object")]
    NotAnObject,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    PrepareTransfer {
        tx_id: TxId,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    },
    PrepareCreate {
        tx_id: TxId,
        account: AccountId,
        initial_balance: Decimal,
    },
    PrepareDelete {
        tx_id: TxId,
        account: AccountId,
    },
    Commit {
        tx_id: Option<TxId>,
    },
    Abort {
        tx_id: Option<TxId>,
    },
    QueryAccount {
        account: AccountId,
    },
    SumPartition,
}

/// Parses one line into a JSON object.
pub fn decode_line(line: &str) -> Result<Map<String, Value>, DecodeError> {
    match serde_json::from_str::<Value>(line)? {
        Value::Object(map) => Ok(map),
        _ => Err(DecodeError::NotAnObject),
    }
}

/// The `tx_id` carried by a raw request, echoed back in error replies.
pub fn raw_tx_id(fields: &Map<String, Value>) -> Option<TxId> {
    match fields.get("tx_id")? {
        Value::String(s) if !s.is_empty() => Some(s.as_str().into()),
        Value::Number(n) => Some(n.to_string().into()),
        _ => None,
    }
}

impl Request {
    /// Builds a request from a decoded record, matching `type` case-insensitively.
    pub fn from_fields(fields: &Map<String, Value>) -> Result<Self, ProtocolError> {
        let kind = fields
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_uppercase();

        match kind.as_str() {
            "PREPARE_TRANSFER" => Ok(Request::PrepareTransfer {
                tx_id: required_tx_id(fields)?,
                from: account_field(fields, "from")?,
                to: account_field(fields, "to")?,
                amount: amount_field(fields, "amount")?,
            }),
            "PREPARE_CREATE" => Ok(Request::PrepareCreate {
                tx_id: required_tx_id(fields)?,
                account: account_field(fields, "account")?,
                initial_balance: match fields.get("initial") {
                    None | Some(Value::Null) => Decimal::ZERO,
                    Some(_) => amount_field(fields, "initial")?,
                },
            }),
            "PREPARE_DELETE" => Ok(Request::PrepareDelete {
                tx_id: required_tx_id(fields)?,
                account: account_field(fields, "account")?,
            }),
            "COMMIT" => Ok(Request::Commit {
                tx_id: raw_tx_id(fields),
            }),
            "ABORT" => Ok(Request::Abort {
                tx_id: raw_tx_id(fields),
            }),
            "CONSULTAR_CUENTA" => Ok(Request::QueryAccount {
                account: account_field(fields, "account")?,
            }),
            "SUM_PARTITION" => Ok(Request::SumPartition),
            _ => Err(ProtocolError::UnknownType),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Request::PrepareTransfer { .. } => "PREPARE_TRANSFER",
            Request::PrepareCreate { .. } => "PREPARE_CREATE",
            Request::PrepareDelete { .. } => "PREPARE_DELETE",
            Request::Commit { .. } => "COMMIT",
            Request::Abort { .. } => "ABORT",
            Request::QueryAccount { .. } => "CONSULTAR_CUENTA",
            Request::SumPartition => "SUM_PARTITION",
        }
    }
}

fn required_tx_id(fields: &Map<String, Value>) -> Result<TxId, ProtocolError> {
    raw_tx_id(fields).ok_or(ProtocolError::MissingTxId)
}

fn account_field(fields: &Map<String, Value>, name: &str) -> Result<AccountId, ProtocolError> {
    let invalid = || ProtocolError::InvalidRequest(format!("field `{}` must be an integer account id", name));

    match fields.get(name) {
        None => Err(ProtocolError::InvalidRequest(format!("missing field `{}`", name))),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(id) => Ok(id),
            None => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as AccountId)
                .ok_or_else(invalid),
        },
        Some(Value::String(s)) => s.trim().parse::<AccountId>().map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

fn amount_field(fields: &Map<String, Value>, name: &str) -> Result<Decimal, ProtocolError> {
    let invalid = || ProtocolError::InvalidRequest(format!("field `{}` must be a non-negative number", name));

    let text = match fields.get(name) {
        None => return Err(ProtocolError::InvalidRequest(format!("missing field `{}`", name))),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(_) => return Err(invalid()),
    };

    let amount = Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| invalid())?;
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(invalid());
    }
    Ok(amount)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ready,
    Committed,
    Aborted,
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<TxId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountId>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub balance: Option<Decimal>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub sum: Option<Decimal>,
}

/// Sent when a response cannot be serialized.
pub const FALLBACK_RESPONSE: &str = "{\"status\":\"ERROR\",\"error\":\"JSON_RESPONSE_ERROR\"}";

impl Response {
    fn with_status(status: Status) -> Self {
        Self {
            status,
            tx_id: None,
            error: None,
            account: None,
            balance: None,
            sum: None,
        }
    }

    pub fn ready(tx_id: TxId) -> Self {
        Self { tx_id: Some(tx_id), ..Self::with_status(Status::Ready) }
    }

    pub fn committed(tx_id: TxId) -> Self {
        Self { tx_id: Some(tx_id), ..Self::with_status(Status::Committed) }
    }

    pub fn aborted(tx_id: Option<TxId>) -> Self {
        Self { tx_id, ..Self::with_status(Status::Aborted) }
    }

    pub fn balance(account: AccountId, balance: Decimal) -> Self {
        Self {
            account: Some(account),
            balance: Some(balance),
            ..Self::with_status(Status::Ok)
        }
    }

    pub fn sum(sum: Decimal) -> Self {
        Self { sum: Some(sum), ..Self::with_status(Status::Ok) }
    }

    pub fn error(tx_id: Option<TxId>, error: &ProtocolError) -> Self {
        Self {
            tx_id,
            error: Some(error.to_string()),
            ..Self::with_status(Status::Error)
        }
    }

    /// One newline-terminated JSON line.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to encode response");
            FALLBACK_RESPONSE.to_string()
        });
        line.push('\n');
        line
    }
}

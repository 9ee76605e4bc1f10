//! SQLite audit sink for the ledger node.
//!
//! Appends one row per applied operation to the `Transacciones` table shared
//! with the rest of the banking tooling.

use std::{
    path::Path,
    sync::{Mutex, PoisonError},
};

use ledger_node_core::{AuditError, AuditRecord, AuditSink};
use rusqlite::{params, Connection};
use time::OffsetDateTime;

pub struct SqliteAuditSink {
    conn: Mutex<Connection>,
}

impl SqliteAuditSink {
    pub fn open(path: &str) -> Result<Self, AuditError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| AuditError::Unavailable(e.to_string()))?;
            }
            Connection::open(path)
        }
        .map_err(|e| AuditError::Unavailable(e.to_string()))?;

        let sink = Self {
            conn: Mutex::new(conn),
        };
        sink.init_schema()?;
        tracing::debug!(path, "SQLite audit sink opened");
        Ok(sink)
    }

    fn init_schema(&self) -> Result<(), AuditError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS Transacciones (
                id_transaccion INTEGER PRIMARY KEY AUTOINCREMENT,
                id_cuenta INTEGER,
                tipo TEXT,
                monto REAL,
                fecha TEXT
            );
            ",
        )
        .map_err(|e| AuditError::Unavailable(e.to_string()))?;
        Ok(())
    }

    /// Number of rows recorded for `account`.
    pub fn count_for_account(&self, account: i64) -> Result<u64, AuditError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.query_row(
            "SELECT COUNT(*) FROM Transacciones WHERE id_cuenta = ?1",
            params![account],
            |row| row.get(0),
        )
        .map_err(|e| AuditError::Unavailable(e.to_string()))
    }
}

fn timestamp_to_str(ts: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        ts.year(),
        ts.month() as u8,
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second()
    )
}

impl AuditSink for SqliteAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO Transacciones (id_cuenta, tipo, monto, fecha) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.account,
                record.kind.label(),
                record.amount.to_string(),
                timestamp_to_str(record.recorded_at)
            ],
        )
        .map_err(|e| AuditError::WriteFailed(e.to_string()))?;
        Ok(())
    }
}

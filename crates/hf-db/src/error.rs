//! Error types for hf-db

use hf_core::InvariantBreach;
use thiserror::Error;

/// Store operation errors
#[derive(Error, Debug)]
pub enum DbError {
    /// Connection error (D001)
    #[error("[D001] Database connection failed: {0}")]
    ConnectionError(String),

    /// Query execution error (D002)
    #[error("[D002] SQL execution failed: {0}")]
    ExecutionError(String),

    /// Table not found (D003)
    #[error("[D003] Table or view not found: {0}")]
    TableNotFound(String),

    /// CSV loading error (D004)
    #[error("[D004] CSV load failed: {0}")]
    CsvError(String),

    /// Transaction error (D005)
    #[error("[D005] Transaction failed: {0}")]
    TransactionError(String),

    /// Mutex poisoned (D006)
    #[error("[D006] Database mutex poisoned: {0}")]
    MutexPoisoned(String),

    /// Internal error (D007)
    #[error("[D007] Internal database error: {0}")]
    Internal(String),

    /// Lock contention, write-write conflict, or an unreachable store (D008)
    #[error("[D008] Transient store failure: {0}")]
    Transient(String),

    /// A planned write found the relation in a different state than was read (D009)
    #[error("[D009] Stale state in {table}: {message}")]
    StaleState { table: String, message: String },

    /// A write would have left the historical relation inconsistent (D010)
    #[error("[D010] Invariant check failed on {table}: {}", format_breaches(breaches))]
    InvariantBreaches {
        table: String,
        breaches: Vec<InvariantBreach>,
    },
}

/// Result type alias for DbError
pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Transient(_))
    }
}

fn format_breaches(breaches: &[InvariantBreach]) -> String {
    const SHOWN: usize = 5;
    let mut parts: Vec<String> = breaches.iter().take(SHOWN).map(|b| b.to_string()).collect();
    if breaches.len() > SHOWN {
        parts.push(format!("and {} more", breaches.len() - SHOWN));
    }
    parts.join(", ")
}

/// Whether a DuckDB error message describes a condition worth retrying
pub(crate) fn is_transient_message(msg: &str) -> bool {
    msg.contains("Could not set lock")
        || msg.contains("database is locked")
        || msg.contains("Conflict on")
        || msg.contains("Transaction conflict")
        || msg.contains("write-write conflict")
}

impl From<duckdb::Error> for DbError {
    fn from(err: duckdb::Error) -> Self {
        // duckdb::Error does not expose structured variants; classify by message.
        let msg = err.to_string();
        if is_transient_message(&msg) {
            DbError::Transient(msg)
        } else if msg.contains("Table with name")
            || msg.contains("View with name")
            || msg.contains("Table or view with name")
            || (msg.contains("Catalog Error") && msg.contains("Table") && msg.contains("not found"))
        {
            DbError::TableNotFound(msg)
        } else {
            DbError::ExecutionError(msg)
        }
    }
}

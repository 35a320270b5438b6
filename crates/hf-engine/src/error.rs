//! Error types for hf-engine

use chrono::{DateTime, Utc};
use hf_core::{CoreError, InvariantBreach, SqlType};
use hf_db::DbError;
use thiserror::Error;

/// A surrogate key that occurs more than once in a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateKey {
    /// The repeated key
    pub surrogate_key: String,
    /// Batch positions of every occurrence
    pub rows: Vec<usize>,
}

impl std::fmt::Display for DuplicateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rows: Vec<String> = self.rows.iter().map(|r| r.to_string()).collect();
        write!(f, "{} (rows {})", self.surrogate_key, rows.join(", "))
    }
}

/// Run-level errors. Any of these fails the whole run.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration or project error surfaced before any row is processed (R001)
    #[error("[R001] {0}")]
    Config(#[from] CoreError),

    /// The batch carries the same surrogate key more than once (R002)
    #[error("[R002] Duplicate key in batch for snapshot '{snapshot}': {}", format_duplicates(keys))]
    DuplicateKeyInBatch {
        snapshot: String,
        keys: Vec<DuplicateKey>,
    },

    /// The historical relation breaks its invariants (R003)
    #[error("[R003] Invariant violation in {table}: {}", format_breaches(breaches))]
    InvariantViolation {
        table: String,
        breaches: Vec<InvariantBreach>,
    },

    /// A close would not move time forward (R004)
    #[error(
        "[R004] Run timestamp {run_timestamp} is not after the current version of {surrogate_key} (valid from {valid_from})"
    )]
    NonMonotonicRunTimestamp {
        surrogate_key: String,
        valid_from: DateTime<Utc>,
        run_timestamp: DateTime<Utc>,
    },

    /// Another run holds a claim on overlapping keys (R005)
    #[error("[R005] Writer conflict on {target}: key {surrogate_key} is claimed by another run")]
    WriterConflict {
        target: String,
        surrogate_key: String,
    },

    /// A transient store failure outlasted the retry budget (R006)
    #[error("[R006] {operation} failed after {attempts} attempts: {source}")]
    TransientStore {
        operation: String,
        attempts: u32,
        #[source]
        source: DbError,
    },

    /// Non-transient store failure (R007)
    #[error("[R007] {0}")]
    Store(DbError),

    /// The run was cancelled before any write (R008)
    #[error("[R008] Run cancelled before any write")]
    Cancelled,

    /// Rows were rejected while the snapshot is strict (R009)
    #[error("[R009] {count} rows rejected in strict snapshot '{snapshot}'; first: {first}")]
    RejectedRows {
        snapshot: String,
        count: usize,
        first: String,
    },

    /// A classification worker panicked or was aborted (R010)
    #[error("[R010] Classification worker failed: {0}")]
    WorkerFailed(String),

    /// A batch value would change if stored in its column (R011)
    #[error(
        "[R011] Row {row_index} of snapshot '{snapshot}': value {value} does not fit column '{column}' ({sql_type}) of {table}"
    )]
    ColumnTypeMismatch {
        snapshot: String,
        table: String,
        column: String,
        sql_type: SqlType,
        value: String,
        row_index: usize,
    },
}

/// Result type alias for EngineError
pub type EngineResult<T> = Result<T, EngineError>;

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::InvariantBreaches { table, breaches } => {
                EngineError::InvariantViolation { table, breaches }
            }
            other => EngineError::Store(other),
        }
    }
}

fn format_duplicates(keys: &[DuplicateKey]) -> String {
    const SHOWN: usize = 3;
    let mut parts: Vec<String> = keys.iter().take(SHOWN).map(|k| k.to_string()).collect();
    if keys.len() > SHOWN {
        parts.push(format!("and {} more", keys.len() - SHOWN));
    }
    parts.join("; ")
}

fn format_breaches(breaches: &[InvariantBreach]) -> String {
    const SHOWN: usize = 5;
    let mut parts: Vec<String> = breaches.iter().take(SHOWN).map(|b| b.to_string()).collect();
    if breaches.len() > SHOWN {
        parts.push(format!("and {} more", breaches.len() - SHOWN));
    }
    parts.join(", ")
}

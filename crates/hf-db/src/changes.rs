//! Planned writes handed from the executors to the store.
//!
//! Each set is applied in one transaction.

use chrono::{DateTime, Utc};
use hf_core::Value;

/// A new historical version opened at the change set's run timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryInsert {
    /// Version identifier
    pub scd_id: String,
    /// Entity identifier
    pub surrogate_key: String,
    /// Attribute values in layout order
    pub values: Vec<Value>,
    /// Fingerprint of the tracked attributes
    pub fingerprint: String,
}

/// Close of the current historical version of one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryClose {
    /// Entity identifier
    pub surrogate_key: String,
    /// Whether the close is caused by the entity disappearing
    pub deleted: bool,
}

/// All historical writes of one run
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryChangeSet {
    /// `valid_to` of closes and `valid_from` of inserts
    pub run_timestamp: DateTime<Utc>,
    /// Versions to close; applied before inserts
    pub closes: Vec<HistoryClose>,
    /// Versions to open
    pub inserts: Vec<HistoryInsert>,
}

impl HistoryChangeSet {
    /// Empty change set for a run
    pub fn new(run_timestamp: DateTime<Utc>) -> Self {
        Self {
            run_timestamp,
            closes: Vec::new(),
            inserts: Vec::new(),
        }
    }

    /// Whether there is nothing to write
    pub fn is_empty(&self) -> bool {
        self.closes.is_empty() && self.inserts.is_empty()
    }

    /// Surrogate keys touched by this change set, sorted and deduplicated
    pub fn touched_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .closes
            .iter()
            .map(|c| c.surrogate_key.clone())
            .chain(self.inserts.iter().map(|i| i.surrogate_key.clone()))
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }
}

/// One write against the current-state relation
#[derive(Debug, Clone, PartialEq)]
pub enum CurrentWrite {
    /// Insert the row, or overwrite it (clearing any tombstone)
    Upsert {
        surrogate_key: String,
        values: Vec<Value>,
        fingerprint: String,
    },
    /// Remove the row
    Delete { surrogate_key: String },
    /// Keep the row but mark it deleted
    Tombstone { surrogate_key: String },
}

impl CurrentWrite {
    /// Entity the write applies to
    pub fn surrogate_key(&self) -> &str {
        match self {
            CurrentWrite::Upsert { surrogate_key, .. }
            | CurrentWrite::Delete { surrogate_key }
            | CurrentWrite::Tombstone { surrogate_key } => surrogate_key,
        }
    }
}

/// All current-state writes of one run
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentChangeSet {
    /// Stored as `last_changed_at`
    pub run_timestamp: DateTime<Utc>,
    /// Writes, at most one per surrogate key
    pub writes: Vec<CurrentWrite>,
}

impl CurrentChangeSet {
    /// Empty change set for a run
    pub fn new(run_timestamp: DateTime<Utc>) -> Self {
        Self {
            run_timestamp,
            writes: Vec::new(),
        }
    }

    /// Whether there is nothing to write
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Which current historical versions to load
#[derive(Debug, Clone, Copy)]
pub enum KeyFilter<'a> {
    /// Every current version in the relation
    All,
    /// Only the listed surrogate keys
    Keys(&'a [String]),
}

/// Which current-state rows to load into the index
#[derive(Debug, Clone, Copy)]
pub struct IndexRequest<'a> {
    /// Keys always looked up, live or tombstoned
    pub probe_keys: &'a [String],
    /// Also load every live row (restricted to `scope_sql` when present)
    pub include_live: bool,
    /// Rendered scope predicate over the current-state columns
    pub scope_sql: Option<&'a str>,
}

//! Temporal merge executor: the only writer of the historical relation.
//!
//! NEW opens a version, CHANGED closes the current version and opens its
//! successor at the same instant, MISSING closes without a successor. The whole
//! change set is one store transaction, so no reader observes a key with zero
//! or two current versions mid-transition.

use crate::differ::Classification;
use crate::error::{EngineError, EngineResult};
use crate::retry::with_retry;
use chrono::{DateTime, Utc};
use hf_core::{scd_id, CurrentVersion, KeyedRow, RetryConfig, TableLayout};
use hf_db::{HistoryChangeSet, HistoryClose, HistoryInsert, HistoryStore};

/// Writes one run's classification to a historical relation
pub struct TemporalMergeExecutor<'a, S: HistoryStore + ?Sized> {
    store: &'a S,
    table: &'a str,
    layout: &'a TableLayout,
    retry: &'a RetryConfig,
}

impl<'a, S: HistoryStore + ?Sized> TemporalMergeExecutor<'a, S> {
    /// Create an executor for `table`
    pub fn new(
        store: &'a S,
        table: &'a str,
        layout: &'a TableLayout,
        retry: &'a RetryConfig,
    ) -> Self {
        Self {
            store,
            table,
            layout,
            retry,
        }
    }

    /// Build the change set for a classification.
    ///
    /// Fails with [`EngineError::NonMonotonicRunTimestamp`] if a close would
    /// end a version at or before its start.
    pub fn plan(
        &self,
        classification: &Classification,
        run_timestamp: DateTime<Utc>,
    ) -> EngineResult<HistoryChangeSet> {
        let mut changes = HistoryChangeSet::new(run_timestamp);

        for row in &classification.new {
            changes.inserts.push(self.open(row, run_timestamp));
        }
        for changed in &classification.changed {
            ensure_forward(&changed.current, run_timestamp)?;
            changes.closes.push(HistoryClose {
                surrogate_key: changed.current.surrogate_key.clone(),
                deleted: false,
            });
            changes.inserts.push(self.open(&changed.row, run_timestamp));
        }
        for missing in &classification.missing {
            ensure_forward(missing, run_timestamp)?;
            changes.closes.push(HistoryClose {
                surrogate_key: missing.surrogate_key.clone(),
                deleted: true,
            });
        }

        Ok(changes)
    }

    /// Apply a change set atomically, retrying transient failures.
    ///
    /// An empty change set issues no store call.
    pub async fn apply(&self, changes: &HistoryChangeSet) -> EngineResult<()> {
        if changes.is_empty() {
            log::debug!("No historical changes for {}", self.table);
            return Ok(());
        }
        with_retry(self.retry, "history write", || {
            self.store.apply_history(self.table, self.layout, changes)
        })
        .await?;
        log::info!(
            "{}: closed {} and opened {} versions",
            self.table,
            changes.closes.len(),
            changes.inserts.len()
        );
        Ok(())
    }

    fn open(&self, row: &KeyedRow, run_timestamp: DateTime<Utc>) -> HistoryInsert {
        HistoryInsert {
            scd_id: scd_id(&row.surrogate_key, run_timestamp),
            surrogate_key: row.surrogate_key.clone(),
            values: self.layout.values_for(&row.row),
            fingerprint: row.fingerprint.clone(),
        }
    }
}

fn ensure_forward(current: &CurrentVersion, run_timestamp: DateTime<Utc>) -> EngineResult<()> {
    if current.valid_from >= run_timestamp {
        return Err(EngineError::NonMonotonicRunTimestamp {
            surrogate_key: current.surrogate_key.clone(),
            valid_from: current.valid_from,
            run_timestamp,
        });
    }
    Ok(())
}

#[cfg(test)]
#[path = "temporal_test.rs"]
mod tests;

//! Incremental upsert executor: the only writer of the current-state relation.
//!
//! Writes are planned against an index of the relation's bookkeeping columns
//! rather than blindly from the classification, which makes the executor
//! idempotent and lets it finish the work of a run that committed its history
//! write but died before the current-state write.

use crate::differ::Classification;
use crate::error::EngineResult;
use crate::retry::with_retry;
use chrono::{DateTime, Utc};
use hf_core::{BatchKind, CurrentStateEntry, DeletionPolicy, KeyedRow, RetryConfig, TableLayout};
use hf_db::{CurrentChangeSet, CurrentStateStore, CurrentWrite};
use std::collections::{HashMap, HashSet};

/// Bookkeeping view of the current-state rows a run may touch
#[derive(Debug, Clone, Default)]
pub struct CurrentStateIndex {
    entries: HashMap<String, CurrentStateEntry>,
}

impl CurrentStateIndex {
    /// Build from loaded rows
    pub fn from_entries(entries: Vec<CurrentStateEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| (e.surrogate_key.clone(), e))
                .collect(),
        }
    }

    /// Row for a key, if loaded
    pub fn get(&self, surrogate_key: &str) -> Option<&CurrentStateEntry> {
        self.entries.get(surrogate_key)
    }

    /// Number of loaded rows
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was loaded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys of live rows that satisfy the scope predicate
    pub fn live_in_scope(&self) -> HashSet<String> {
        self.entries
            .values()
            .filter(|e| !e.is_deleted && e.in_scope)
            .map(|e| e.surrogate_key.clone())
            .collect()
    }

    fn holds(&self, row: &KeyedRow) -> bool {
        self.entries
            .get(&row.surrogate_key)
            .is_some_and(|e| !e.is_deleted && e.fingerprint == row.fingerprint)
    }
}

/// Current-state writes of one run and what they amount to
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentPlan {
    /// Writes to apply
    pub changes: CurrentChangeSet,
    /// Writes that re-synchronize rows left stale by an interrupted run
    pub repaired: usize,
}

impl CurrentPlan {
    /// Keys written that the classification did not name
    pub fn orphan_keys(&self, classification: &Classification) -> Vec<String> {
        let named = named_keys(classification);
        self.changes
            .writes
            .iter()
            .map(CurrentWrite::surrogate_key)
            .filter(|k| !named.contains(k))
            .map(String::from)
            .collect()
    }
}

fn named_keys(classification: &Classification) -> HashSet<&str> {
    classification
        .new
        .iter()
        .chain(&classification.unchanged)
        .map(|r| r.surrogate_key.as_str())
        .chain(
            classification
                .changed
                .iter()
                .map(|c| c.row.surrogate_key.as_str()),
        )
        .chain(classification.missing.iter().map(|m| m.surrogate_key.as_str()))
        .collect()
}

/// Writes one run's classification to a current-state relation
pub struct IncrementalUpsertExecutor<'a, S: CurrentStateStore + ?Sized> {
    store: &'a S,
    table: &'a str,
    layout: &'a TableLayout,
    deletion_policy: DeletionPolicy,
    retry: &'a RetryConfig,
}

impl<'a, S: CurrentStateStore + ?Sized> IncrementalUpsertExecutor<'a, S> {
    /// Create an executor for `table`
    pub fn new(
        store: &'a S,
        table: &'a str,
        layout: &'a TableLayout,
        deletion_policy: DeletionPolicy,
        retry: &'a RetryConfig,
    ) -> Self {
        Self {
            store,
            table,
            layout,
            deletion_policy,
            retry,
        }
    }

    /// Plan the writes for a classification against the loaded index.
    ///
    /// NEW and CHANGED rows are upserted unless the row already holds the
    /// incoming fingerprint. UNCHANGED rows are written only when the stored
    /// row is stale or absent. MISSING rows get the deletion policy. For a
    /// complete batch, live in-scope rows that the batch does not mention
    /// and the history no longer tracks get the deletion policy too.
    pub fn plan(
        &self,
        classification: &Classification,
        index: &CurrentStateIndex,
        batch_kind: BatchKind,
        run_timestamp: DateTime<Utc>,
    ) -> CurrentPlan {
        let mut changes = CurrentChangeSet::new(run_timestamp);
        let mut repaired = 0;

        let upserts = classification
            .new
            .iter()
            .chain(classification.changed.iter().map(|c| &c.row));
        for row in upserts {
            if !index.holds(row) {
                changes.writes.push(self.upsert(row));
            }
        }

        for row in &classification.unchanged {
            if !index.holds(row) {
                log::debug!("Repairing stale current-state row {}", row.surrogate_key);
                changes.writes.push(self.upsert(row));
                repaired += 1;
            }
        }

        for missing in &classification.missing {
            if let Some(write) = self.removal(index.get(&missing.surrogate_key)) {
                changes.writes.push(write);
            }
        }

        if batch_kind.allows_missing() && self.deletion_policy.detects_missing() {
            let named = named_keys(classification);
            let mut orphans: Vec<&str> = index
                .entries
                .values()
                .filter(|e| !e.is_deleted && e.in_scope)
                .map(|e| e.surrogate_key.as_str())
                .filter(|k| !named.contains(k))
                .collect();
            orphans.sort_unstable();
            for key in orphans {
                if let Some(write) = self.removal(index.get(key)) {
                    log::debug!("Removing orphaned current-state row {}", key);
                    changes.writes.push(write);
                    repaired += 1;
                }
            }
        }

        CurrentPlan { changes, repaired }
    }

    /// Apply planned writes atomically, retrying transient failures.
    ///
    /// An empty plan issues no store call.
    pub async fn apply(&self, plan: &CurrentPlan) -> EngineResult<()> {
        if plan.changes.is_empty() {
            log::debug!("No current-state changes for {}", self.table);
            return Ok(());
        }
        with_retry(self.retry, "current-state write", || {
            self.store.apply_current(self.table, self.layout, &plan.changes)
        })
        .await?;
        log::info!(
            "{}: applied {} writes ({} repairs)",
            self.table,
            plan.changes.writes.len(),
            plan.repaired
        );
        Ok(())
    }

    fn upsert(&self, row: &KeyedRow) -> CurrentWrite {
        CurrentWrite::Upsert {
            surrogate_key: row.surrogate_key.clone(),
            values: self.layout.values_for(&row.row),
            fingerprint: row.fingerprint.clone(),
        }
    }

    fn removal(&self, entry: Option<&CurrentStateEntry>) -> Option<CurrentWrite> {
        let entry = entry?;
        match self.deletion_policy {
            DeletionPolicy::None => None,
            DeletionPolicy::Close => Some(CurrentWrite::Delete {
                surrogate_key: entry.surrogate_key.clone(),
            }),
            DeletionPolicy::Tombstone if entry.is_deleted => None,
            DeletionPolicy::Tombstone => Some(CurrentWrite::Tombstone {
                surrogate_key: entry.surrogate_key.clone(),
            }),
        }
    }
}

#[cfg(test)]
#[path = "upsert_test.rs"]
mod tests;

//! Run coordinator: applies one snapshot batch end to end.
//!
//! Phases: validate, key, claim, read, classify, plan, write history, write
//! current state. Everything before the history write is free of persisted
//! effect, so cancellation and every batch-level failure up to that point
//! leave both relations untouched.

use crate::claims::ClaimRegistry;
use crate::differ::{classify, current_by_key, find_duplicate_keys, DiffOptions};
use crate::error::{EngineError, EngineResult};
use crate::retry::with_retry;
use crate::temporal::TemporalMergeExecutor;
use crate::upsert::{CurrentStateIndex, IncrementalUpsertExecutor};
use chrono::{DateTime, SubsecRound, Utc};
use hf_core::{
    InvariantBreach, KeyedRow, RetryConfig, Row, RowRejection, RunCounts, RunResult,
    SnapshotBatch, SnapshotConfig, TableLayout,
};
use hf_db::{IndexRequest, KeyFilter, Store};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-invocation settings
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Logical instant of the run; defaults to now
    pub run_timestamp: Option<DateTime<Utc>>,
    /// Set to abort the run before its first write
    pub cancel: Option<Arc<AtomicBool>>,
}

impl RunOptions {
    /// Options with a fixed run timestamp
    pub fn at(run_timestamp: DateTime<Utc>) -> Self {
        Self {
            run_timestamp: Some(run_timestamp),
            cancel: None,
        }
    }

    /// Attach a cancellation flag
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn ensure_live(&self, phase: &str) -> EngineResult<()> {
        if self
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
        {
            log::warn!("Run cancelled before {}", phase);
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }
}

/// Sequences the differ and both executors for one batch at a time
pub struct RunCoordinator {
    store: Arc<dyn Store>,
    claims: ClaimRegistry,
}

impl RunCoordinator {
    /// Coordinator with its own claim registry
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_claims(store, ClaimRegistry::new())
    }

    /// Coordinator sharing a claim registry with other coordinators
    pub fn with_claims(store: Arc<dyn Store>, claims: ClaimRegistry) -> Self {
        Self { store, claims }
    }

    /// The claim registry in use
    pub fn claims(&self) -> &ClaimRegistry {
        &self.claims
    }

    /// Apply one batch to a snapshot's two relations.
    ///
    /// Batch-level failures (configuration, duplicate keys, strict-mode
    /// rejections, persisted invariant breaches, writer conflicts,
    /// non-monotonic timestamps, column type mismatches, cancellation) are
    /// raised before any write.
    pub async fn run(
        &self,
        config: &SnapshotConfig,
        batch: SnapshotBatch,
        options: RunOptions,
    ) -> EngineResult<RunResult> {
        config.validate()?;

        let run_timestamp = options
            .run_timestamp
            .unwrap_or_else(Utc::now)
            .trunc_subsecs(6);
        let history = config.history_table_name();
        let current = config.current_table_name();
        let layout = config.layout(&batch.rows);
        let batch_kind = batch.kind;
        let retry = &config.retry;
        let store: &dyn Store = self.store.as_ref();

        log::info!(
            "Running snapshot '{}' ({} batch, {} rows) at {}",
            config.name,
            batch_kind,
            batch.rows.len(),
            run_timestamp
        );

        let (rows, rejected) = key_rows(config, batch.rows)?;
        if config.strict {
            if let Some(first) = rejected.first() {
                return Err(EngineError::RejectedRows {
                    snapshot: config.name.clone(),
                    count: rejected.len(),
                    first: format!("row {}: {}", first.row_index, first.reason),
                });
            }
        }

        let duplicates = find_duplicate_keys(&rows);
        if !duplicates.is_empty() {
            return Err(EngineError::DuplicateKeyInBatch {
                snapshot: config.name.clone(),
                keys: duplicates,
            });
        }
        options.ensure_live("claiming keys")?;

        let batch_keys: Vec<String> = rows.iter().map(|r| r.surrogate_key.clone()).collect();
        let mut claim = self
            .claims
            .claim(&[history.as_str(), current.as_str()], &batch_keys)?;

        with_retry(retry, "ensure history table", || {
            store.ensure_history_table(&history, &layout)
        })
        .await?;
        with_retry(retry, "ensure current-state table", || {
            store.ensure_current_table(&current, &layout)
        })
        .await?;
        let history_layout = stored_layout(store, &history, &layout, retry).await?;
        let current_layout = stored_layout(store, &current, &layout, retry).await?;
        for (table, stored) in [(&history, &history_layout), (&current, &current_layout)] {
            check_fit(&config.name, table, stored, &rows)?;
        }

        let detect_missing =
            batch_kind.allows_missing() && config.deletion_policy.detects_missing();
        let scope_sql = config.scope.as_ref().map(|s| s.to_sql(run_timestamp));
        let index = CurrentStateIndex::from_entries(
            with_retry(retry, "load current-state index", || {
                store.load_current_index(
                    &current,
                    IndexRequest {
                        probe_keys: &batch_keys,
                        include_live: detect_missing,
                        scope_sql: scope_sql.as_deref(),
                    },
                )
            })
            .await?,
        );

        let missing_scope = (detect_missing && config.scope.is_some())
            .then(|| Arc::new(index.live_in_scope()));
        let probe_keys: Vec<String> = match &missing_scope {
            Some(scope) => batch_keys
                .iter()
                .chain(scope.iter())
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            None => batch_keys.clone(),
        };
        let filter = if detect_missing && missing_scope.is_none() {
            KeyFilter::All
        } else {
            KeyFilter::Keys(&probe_keys)
        };
        let versions = with_retry(retry, "load current versions", || {
            store.load_current_versions(&history, filter)
        })
        .await?;
        let current_versions =
            current_by_key(versions).map_err(|breaches| EngineError::InvariantViolation {
                table: history.clone(),
                breaches,
            })?;
        options.ensure_live("classification")?;

        let classification = classify(
            &config.name,
            rows,
            current_versions,
            &DiffOptions {
                batch_kind,
                deletion_policy: config.deletion_policy,
                missing_scope,
                parallelism: config.parallelism,
            },
        )
        .await?;

        let temporal = TemporalMergeExecutor::new(store, &history, &history_layout, retry);
        let history_changes = temporal.plan(&classification, run_timestamp)?;
        let upsert = IncrementalUpsertExecutor::new(
            store,
            &current,
            &current_layout,
            config.deletion_policy,
            retry,
        );
        let current_plan = upsert.plan(&classification, &index, batch_kind, run_timestamp);

        claim.extend(&classification.missing_keys())?;
        claim.extend(&current_plan.orphan_keys(&classification))?;
        options.ensure_live("writing")?;

        temporal.apply(&history_changes).await?;
        upsert.apply(&current_plan).await?;
        drop(claim);

        let missing = classification.missing.len();
        let counts = RunCounts {
            inserted: classification.new.len(),
            updated: classification.changed.len(),
            closed: classification.changed.len() + missing,
            unchanged: classification.unchanged.len(),
            deleted: missing,
            repaired: current_plan.repaired,
        };
        let result = RunResult::new(&config.name, run_timestamp, batch_kind, counts, rejected);
        log::info!(
            "Snapshot '{}' run {}: {} inserted, {} updated, {} closed, {} unchanged, {} deleted, {} repaired, {} rejected",
            result.snapshot,
            result.run_id,
            result.inserted,
            result.updated,
            result.closed,
            result.unchanged,
            result.deleted,
            result.repaired,
            result.rejected.len()
        );
        Ok(result)
    }

    /// Scan a snapshot's historical relation for invariant breaches.
    ///
    /// A relation that does not exist yet has none.
    pub async fn check(&self, config: &SnapshotConfig) -> EngineResult<Vec<InvariantBreach>> {
        let history = config.history_table_name();
        let store: &dyn Store = self.store.as_ref();
        let exists = with_retry(&config.retry, "check history table", || {
            store.relation_exists(&history)
        })
        .await?;
        if !exists {
            log::debug!("{} does not exist yet, nothing to check", history);
            return Ok(Vec::new());
        }
        with_retry(&config.retry, "invariant check", || {
            store.check_history(&history)
        })
        .await
    }
}

/// The batch layout with column types as the relation actually stores them
async fn stored_layout(
    store: &dyn Store,
    table: &str,
    layout: &TableLayout,
    retry: &RetryConfig,
) -> EngineResult<TableLayout> {
    let types = with_retry(retry, "read column types", || store.column_types(table)).await?;
    Ok(layout.with_stored_types(&types))
}

/// Fail on the first value its stored column would alter
fn check_fit(
    snapshot: &str,
    table: &str,
    layout: &TableLayout,
    rows: &[KeyedRow],
) -> EngineResult<()> {
    for row in rows {
        if let Some((column, value)) = layout.first_unfit(&row.row) {
            return Err(EngineError::ColumnTypeMismatch {
                snapshot: snapshot.to_string(),
                table: table.to_string(),
                column: column.name.clone(),
                sql_type: column.sql_type,
                value: format!("{:?}", value),
                row_index: row.index,
            });
        }
    }
    Ok(())
}

/// Key every row. Rows that fail on their own are set aside with the reason.
fn key_rows(
    config: &SnapshotConfig,
    rows: Vec<Row>,
) -> EngineResult<(Vec<KeyedRow>, Vec<RowRejection>)> {
    let keyer = config.keyer();
    let mut keyed = Vec::with_capacity(rows.len());
    let mut rejected = Vec::new();
    for (index, row) in rows.into_iter().enumerate() {
        match keyer.key_row(index, row) {
            Ok(row) => keyed.push(row),
            Err(e) if e.is_row_error() => {
                log::warn!("Snapshot '{}' rejected row {}: {}", config.name, index, e);
                rejected.push(RowRejection {
                    row_index: index,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok((keyed, rejected))
}

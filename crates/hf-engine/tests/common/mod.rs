//! Shared fixtures for engine scenario tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hf_core::{
    BatchKind, CurrentStateEntry, CurrentVersion, DeletionPolicy, InvariantBreach, RetryConfig,
    Row, SnapshotBatch, SnapshotConfig, TableLayout, Value,
};
use hf_db::{
    CurrentChangeSet, CurrentStateStore, DatabaseCore, DbError, DbResult, DuckDbBackend,
    HistoryChangeSet, HistoryStore, IndexRequest, KeyFilter,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// DuckDB store that fails on demand and counts write attempts
pub struct FlakyStore {
    inner: DuckDbBackend,
    transient_history_failures: AtomicUsize,
    transient_current_failures: AtomicUsize,
    break_current_writes: AtomicBool,
    pub history_write_attempts: AtomicUsize,
    pub current_write_attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: DuckDbBackend::in_memory().unwrap(),
            transient_history_failures: AtomicUsize::new(0),
            transient_current_failures: AtomicUsize::new(0),
            break_current_writes: AtomicBool::new(false),
            history_write_attempts: AtomicUsize::new(0),
            current_write_attempts: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` history writes with a lock conflict
    pub fn fail_history_writes(&self, n: usize) {
        self.transient_history_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` current-state writes with a lock conflict
    pub fn fail_current_writes(&self, n: usize) {
        self.transient_current_failures.store(n, Ordering::SeqCst);
    }

    /// Make every current-state write fail permanently until reset
    pub fn break_current_writes(&self, broken: bool) {
        self.break_current_writes.store(broken, Ordering::SeqCst);
    }

    pub fn history_writes(&self) -> usize {
        self.history_write_attempts.load(Ordering::SeqCst)
    }

    pub fn current_writes(&self) -> usize {
        self.current_write_attempts.load(Ordering::SeqCst)
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn lock_conflict() -> DbError {
    DbError::Transient("Could not set lock on file".to_string())
}

#[async_trait]
impl DatabaseCore for FlakyStore {
    async fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.inner.execute_batch(sql).await
    }

    async fn relation_exists(&self, name: &str) -> DbResult<bool> {
        self.inner.relation_exists(name).await
    }

    async fn query_rows(&self, sql: &str) -> DbResult<Vec<Row>> {
        self.inner.query_rows(sql).await
    }

    async fn read_csv_rows(&self, path: &str) -> DbResult<Vec<Row>> {
        self.inner.read_csv_rows(path).await
    }

    async fn column_types(&self, table: &str) -> DbResult<BTreeMap<String, String>> {
        self.inner.column_types(table).await
    }

    fn db_type(&self) -> &'static str {
        "flaky-duckdb"
    }
}

#[async_trait]
impl HistoryStore for FlakyStore {
    async fn ensure_history_table(
        &self,
        table: &str,
        layout: &TableLayout,
    ) -> DbResult<Vec<String>> {
        self.inner.ensure_history_table(table, layout).await
    }

    async fn load_current_versions(
        &self,
        table: &str,
        filter: KeyFilter<'_>,
    ) -> DbResult<Vec<CurrentVersion>> {
        self.inner.load_current_versions(table, filter).await
    }

    async fn apply_history(
        &self,
        table: &str,
        layout: &TableLayout,
        changes: &HistoryChangeSet,
    ) -> DbResult<()> {
        self.history_write_attempts.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.transient_history_failures) {
            return Err(lock_conflict());
        }
        self.inner.apply_history(table, layout, changes).await
    }

    async fn check_history(&self, table: &str) -> DbResult<Vec<InvariantBreach>> {
        self.inner.check_history(table).await
    }
}

#[async_trait]
impl CurrentStateStore for FlakyStore {
    async fn ensure_current_table(
        &self,
        table: &str,
        layout: &TableLayout,
    ) -> DbResult<Vec<String>> {
        self.inner.ensure_current_table(table, layout).await
    }

    async fn load_current_index(
        &self,
        table: &str,
        request: IndexRequest<'_>,
    ) -> DbResult<Vec<CurrentStateEntry>> {
        self.inner.load_current_index(table, request).await
    }

    async fn apply_current(
        &self,
        table: &str,
        layout: &TableLayout,
        changes: &CurrentChangeSet,
    ) -> DbResult<()> {
        self.current_write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.break_current_writes.load(Ordering::SeqCst) {
            return Err(DbError::ExecutionError(
                "connection reset during current-state write".to_string(),
            ));
        }
        if take_failure(&self.transient_current_failures) {
            return Err(lock_conflict());
        }
        self.inner.apply_current(table, layout, changes).await
    }
}

pub const SNAPSHOT: &str = "snap_users";
pub const CURRENT: &str = "snap_users_current";

/// `snap_users` keyed on `id`, tracking `name` and `tier`
pub fn users_config(deletion_policy: DeletionPolicy) -> SnapshotConfig {
    let mut config = SnapshotConfig::new(
        SNAPSHOT,
        vec!["id".to_string()],
        vec!["name".to_string(), "tier".to_string()],
        BatchKind::Full,
    );
    config.deletion_policy = deletion_policy;
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
    };
    config
}

pub fn user(id: i64, name: &str, tier: &str) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), Value::Int(id));
    row.insert("name".to_string(), Value::from(name));
    row.insert("tier".to_string(), Value::from(tier));
    row
}

pub fn full(rows: Vec<Row>) -> SnapshotBatch {
    SnapshotBatch::new(BatchKind::Full, rows)
}

pub fn partial(rows: Vec<Row>) -> SnapshotBatch {
    SnapshotBatch::new(BatchKind::Partial, rows)
}

pub fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
}

pub fn micros(d: u32) -> Value {
    Value::Int(day(d).timestamp_micros())
}

/// Every historical version of `snap_users`, ordered by entity then start
pub async fn history_rows<S: DatabaseCore + ?Sized>(store: &S) -> Vec<Row> {
    store
        .query_rows(
            "SELECT surrogate_key, id, name, tier, is_current, is_deleted, \
             epoch_us(valid_from) AS valid_from, epoch_us(valid_to) AS valid_to \
             FROM snap_users ORDER BY id, valid_from",
        )
        .await
        .unwrap()
}

/// Every row of `snap_users_current`, ordered by entity
pub async fn current_rows<S: DatabaseCore + ?Sized>(store: &S) -> Vec<Row> {
    store
        .query_rows(
            "SELECT id, name, tier, is_deleted, epoch_us(last_changed_at) AS last_changed_at \
             FROM snap_users_current ORDER BY id",
        )
        .await
        .unwrap()
}

/// Ids of the current historical versions
pub async fn current_ids<S: DatabaseCore + ?Sized>(store: &S) -> Vec<i64> {
    history_rows(store)
        .await
        .into_iter()
        .filter(|r| r["is_current"] == Value::Bool(true))
        .filter_map(|r| match r["id"] {
            Value::Int(id) => Some(id),
            _ => None,
        })
        .collect()
}

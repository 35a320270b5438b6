//! Store trait definitions
//!
//! The historical relation and the current-state relation are written through
//! separate traits so that each executor only sees the relation it owns.

use crate::changes::{CurrentChangeSet, HistoryChangeSet, IndexRequest, KeyFilter};
use crate::error::DbResult;
use async_trait::async_trait;
use hf_core::{CurrentStateEntry, CurrentVersion, InvariantBreach, Row, TableLayout};
use std::collections::BTreeMap;

/// Generic access used for loading batches and reporting
#[async_trait]
pub trait DatabaseCore: Send + Sync {
    /// Execute multiple SQL statements
    async fn execute_batch(&self, sql: &str) -> DbResult<()>;

    /// Check if a table or view exists
    async fn relation_exists(&self, name: &str) -> DbResult<bool>;

    /// Run a query and return every row as typed values
    async fn query_rows(&self, sql: &str) -> DbResult<Vec<Row>>;

    /// Read every row of a CSV file
    async fn read_csv_rows(&self, path: &str) -> DbResult<Vec<Row>>;

    /// Column name to declared type name for an existing relation
    async fn column_types(&self, table: &str) -> DbResult<BTreeMap<String, String>>;

    /// Database type identifier for logging
    fn db_type(&self) -> &'static str;
}

/// Read/write contract of the historical relation
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Create the relation (and its schema) if missing and append attribute
    /// columns the layout has gained. Returns the names of added columns.
    async fn ensure_history_table(&self, table: &str, layout: &TableLayout)
        -> DbResult<Vec<String>>;

    /// Load versions with `is_current = true`
    async fn load_current_versions(
        &self,
        table: &str,
        filter: KeyFilter<'_>,
    ) -> DbResult<Vec<CurrentVersion>>;

    /// Apply closes then inserts in a single transaction. The touched keys are
    /// checked for invariant breaches before commit; any breach rolls back.
    async fn apply_history(
        &self,
        table: &str,
        layout: &TableLayout,
        changes: &HistoryChangeSet,
    ) -> DbResult<()>;

    /// Scan the whole relation for invariant breaches
    async fn check_history(&self, table: &str) -> DbResult<Vec<InvariantBreach>>;
}

/// Read/write contract of the current-state relation
#[async_trait]
pub trait CurrentStateStore: Send + Sync {
    /// Create the relation (and its schema) if missing and append attribute
    /// columns the layout has gained. Returns the names of added columns.
    async fn ensure_current_table(&self, table: &str, layout: &TableLayout)
        -> DbResult<Vec<String>>;

    /// Load the bookkeeping columns of the requested rows
    async fn load_current_index(
        &self,
        table: &str,
        request: IndexRequest<'_>,
    ) -> DbResult<Vec<CurrentStateEntry>>;

    /// Apply every write in a single transaction
    async fn apply_current(
        &self,
        table: &str,
        layout: &TableLayout,
        changes: &CurrentChangeSet,
    ) -> DbResult<()>;
}

/// A backend that owns both relations
pub trait Store: DatabaseCore + HistoryStore + CurrentStateStore {}

impl<T: DatabaseCore + HistoryStore + CurrentStateStore> Store for T {}

//! DuckDB store backend implementation

use crate::changes::{CurrentChangeSet, CurrentWrite, HistoryChangeSet, IndexRequest, KeyFilter};
use crate::error::{DbError, DbResult};
use crate::row_helpers::{collect_rows, from_micros, to_param, ts_param};
use crate::sql;
use crate::traits::{CurrentStateStore, DatabaseCore, HistoryStore};
use async_trait::async_trait;
use duckdb::types::Value as DuckValue;
use duckdb::{params, params_from_iter, Connection};
use hf_core::sql_utils::{escape_sql_string, quote_qualified, split_qualified_name};
use hf_core::{BreachKind, CurrentStateEntry, CurrentVersion, InvariantBreach, Row, TableLayout};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Keys per INSERT when staging key lists
const STAGE_CHUNK: usize = 1000;

/// DuckDB store backend
pub struct DuckDbBackend {
    conn: Mutex<Connection>,
}

impl DuckDbBackend {
    /// Create a new in-memory DuckDB connection
    pub fn in_memory() -> DbResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| DbError::ConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create a new DuckDB connection from a file path
    pub fn from_path(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path).map_err(|e| match DbError::from(e) {
            DbError::Transient(msg) => DbError::Transient(msg),
            other => DbError::ConnectionError(other.to_string()),
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create from path string (handles :memory: special case)
    pub fn new(path: &str) -> DbResult<Self> {
        if path == ":memory:" {
            Self::in_memory()
        } else {
            Self::from_path(Path::new(path))
        }
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| DbError::MutexPoisoned(e.to_string()))
    }

    /// Run `body` between BEGIN and COMMIT, rolling back on any error.
    fn transaction<F, T>(conn: &Connection, body: F) -> DbResult<T>
    where
        F: FnOnce(&Connection) -> DbResult<T>,
    {
        conn.execute_batch("BEGIN TRANSACTION")
            .map_err(|e| transaction_error("BEGIN", e))?;

        let result = body(conn);

        match &result {
            Ok(_) => {
                if let Err(commit_err) = conn.execute_batch("COMMIT") {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(transaction_error("COMMIT", commit_err));
                }
            }
            Err(e) => {
                log::debug!("Rolling back transaction: {}", e);
                let _ = conn.execute_batch("ROLLBACK");
            }
        }
        result
    }

    /// Replace the contents of the key staging table
    fn stage_keys(conn: &Connection, keys: &[String]) -> DbResult<()> {
        conn.execute_batch(&format!(
            "CREATE OR REPLACE TEMP TABLE {} (surrogate_key VARCHAR)",
            sql::KEYS_TABLE
        ))?;
        for chunk in keys.chunks(STAGE_CHUNK) {
            let values = chunk
                .iter()
                .map(|k| format!("('{}')", escape_sql_string(k)))
                .collect::<Vec<_>>()
                .join(", ");
            conn.execute_batch(&format!(
                "INSERT INTO {} VALUES {}",
                sql::KEYS_TABLE,
                values
            ))?;
        }
        Ok(())
    }

    fn create_schema_for(conn: &Connection, table: &str) -> DbResult<()> {
        let (schema, _) = split_qualified_name(table);
        if schema != "main" {
            conn.execute_batch(&format!(
                "CREATE SCHEMA IF NOT EXISTS {}",
                quote_qualified(schema)
            ))?;
        }
        Ok(())
    }

    fn existing_columns(conn: &Connection, table: &str) -> DbResult<Vec<String>> {
        let (schema, name) = split_qualified_name(table);
        let mut stmt = conn.prepare(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = ? AND table_name = ? ORDER BY ordinal_position",
        )?;
        let columns = stmt
            .query_map(params![schema, name], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    /// Create `table` with `create_sql` if needed, then append missing layout columns
    fn ensure_table(
        &self,
        table: &str,
        create_sql: &str,
        layout: &TableLayout,
    ) -> DbResult<Vec<String>> {
        let conn = self.lock()?;
        Self::create_schema_for(&conn, table)?;
        conn.execute_batch(create_sql)
            .map_err(|e| with_context(e, create_sql))?;

        let existing = Self::existing_columns(&conn, table)?;
        let mut added = Vec::new();
        for (column, alter) in sql::add_missing_columns(table, layout, &existing) {
            conn.execute_batch(&alter)
                .map_err(|e| with_context(e, &alter))?;
            log::info!("Added column '{}' to {}", column, table);
            added.push(column);
        }
        Ok(added)
    }

    fn find_breaches(
        conn: &Connection,
        table: &str,
        restrict_to_keys: bool,
    ) -> DbResult<Vec<InvariantBreach>> {
        let query = sql::detect_breaches(table, restrict_to_keys);
        let mut stmt = conn.prepare(&query)?;
        let raw = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(surrogate_key, kind)| {
                let kind = BreachKind::from_name(&kind)
                    .ok_or_else(|| DbError::Internal(format!("unknown breach kind '{kind}'")))?;
                Ok(InvariantBreach {
                    surrogate_key,
                    kind,
                })
            })
            .collect()
    }

    fn apply_history_sync(
        &self,
        table: &str,
        layout: &TableLayout,
        changes: &HistoryChangeSet,
    ) -> DbResult<()> {
        let conn = self.lock()?;
        Self::transaction(&conn, |conn| {
            let ts = ts_param(changes.run_timestamp);

            let close_sql = sql::close_history_version(table);
            let mut close = conn.prepare(&close_sql)?;
            for c in &changes.closes {
                let affected = close.execute(params![ts.clone(), c.deleted, c.surrogate_key])?;
                if affected != 1 {
                    return Err(DbError::StaleState {
                        table: table.to_string(),
                        message: format!(
                            "closing {} affected {} current versions",
                            c.surrogate_key, affected
                        ),
                    });
                }
            }

            let insert_sql = sql::insert_history_version(table, layout);
            let mut insert = conn.prepare(&insert_sql)?;
            for row in &changes.inserts {
                let mut values: Vec<DuckValue> = Vec::with_capacity(row.values.len() + 4);
                values.push(DuckValue::Text(row.scd_id.clone()));
                values.push(DuckValue::Text(row.surrogate_key.clone()));
                values.extend(row.values.iter().map(to_param));
                values.push(DuckValue::Text(row.fingerprint.clone()));
                values.push(ts.clone());
                insert.execute(params_from_iter(values.iter()))?;
            }

            Self::stage_keys(conn, &changes.touched_keys())?;
            let breaches = Self::find_breaches(conn, table, true)?;
            if !breaches.is_empty() {
                return Err(DbError::InvariantBreaches {
                    table: table.to_string(),
                    breaches,
                });
            }
            Ok(())
        })?;

        log::debug!(
            "Applied {} closes and {} inserts to {}",
            changes.closes.len(),
            changes.inserts.len(),
            table
        );
        Ok(())
    }

    fn apply_current_sync(
        &self,
        table: &str,
        layout: &TableLayout,
        changes: &CurrentChangeSet,
    ) -> DbResult<()> {
        let conn = self.lock()?;
        Self::transaction(&conn, |conn| {
            let ts = ts_param(changes.run_timestamp);
            let update_sql = sql::update_current_row(table, layout);
            let insert_sql = sql::insert_current_row(table, layout);
            let delete_sql = sql::delete_current_row(table);
            let tombstone_sql = sql::tombstone_current_row(table);
            let mut update = conn.prepare(&update_sql)?;
            let mut insert = conn.prepare(&insert_sql)?;
            let mut delete = conn.prepare(&delete_sql)?;
            let mut tombstone = conn.prepare(&tombstone_sql)?;

            for write in &changes.writes {
                match write {
                    CurrentWrite::Upsert {
                        surrogate_key,
                        values,
                        fingerprint,
                    } => {
                        let mut params: Vec<DuckValue> = values.iter().map(to_param).collect();
                        params.push(DuckValue::Text(fingerprint.clone()));
                        params.push(ts.clone());
                        params.push(DuckValue::Text(surrogate_key.clone()));
                        let updated = update.execute(params_from_iter(params.iter()))?;
                        if updated > 1 {
                            return Err(DbError::StaleState {
                                table: table.to_string(),
                                message: format!("{} rows share key {}", updated, surrogate_key),
                            });
                        }
                        if updated == 0 {
                            let mut params: Vec<DuckValue> =
                                vec![DuckValue::Text(surrogate_key.clone())];
                            params.extend(values.iter().map(to_param));
                            params.push(DuckValue::Text(fingerprint.clone()));
                            params.push(ts.clone());
                            insert.execute(params_from_iter(params.iter()))?;
                        }
                    }
                    CurrentWrite::Delete { surrogate_key } => {
                        delete.execute(params![surrogate_key])?;
                    }
                    CurrentWrite::Tombstone { surrogate_key } => {
                        tombstone.execute(params![ts.clone(), surrogate_key])?;
                    }
                }
            }
            Ok(())
        })?;

        log::debug!("Applied {} writes to {}", changes.writes.len(), table);
        Ok(())
    }
}

fn transaction_error(phase: &str, err: duckdb::Error) -> DbError {
    match DbError::from(err) {
        DbError::Transient(msg) => DbError::Transient(format!("{phase} failed: {msg}")),
        other => DbError::TransactionError(format!("{phase} failed: {other}")),
    }
}

fn with_context(err: duckdb::Error, sql: &str) -> DbError {
    match DbError::from(err) {
        DbError::ExecutionError(msg) => DbError::ExecutionError(format!("{}: {}", msg, sql)),
        other => other,
    }
}

#[async_trait]
impl DatabaseCore for DuckDbBackend {
    async fn execute_batch(&self, sql: &str) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(sql).map_err(|e| with_context(e, sql))
    }

    async fn relation_exists(&self, name: &str) -> DbResult<bool> {
        let conn = self.lock()?;
        let (schema, table) = split_qualified_name(name);
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ? AND table_name = ?",
            params![schema, table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn query_rows(&self, sql: &str) -> DbResult<Vec<Row>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(|e| with_context(e, sql))?;
        collect_rows(&mut stmt)
    }

    async fn read_csv_rows(&self, path: &str) -> DbResult<Vec<Row>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT * FROM read_csv_auto('{}')",
            escape_sql_string(path)
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| DbError::CsvError(format!("{}: {}", path, e)))?;
        collect_rows(&mut stmt).map_err(|e| DbError::CsvError(format!("{}: {}", path, e)))
    }

    async fn column_types(&self, table: &str) -> DbResult<BTreeMap<String, String>> {
        let conn = self.lock()?;
        let (schema, name) = split_qualified_name(table);
        let mut stmt = conn.prepare(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_schema = ? AND table_name = ?",
        )?;
        let types = stmt
            .query_map(params![schema, name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(types)
    }

    fn db_type(&self) -> &'static str {
        "duckdb"
    }
}

#[async_trait]
impl HistoryStore for DuckDbBackend {
    async fn ensure_history_table(
        &self,
        table: &str,
        layout: &TableLayout,
    ) -> DbResult<Vec<String>> {
        self.ensure_table(table, &sql::create_history_table(table, layout), layout)
    }

    async fn load_current_versions(
        &self,
        table: &str,
        filter: KeyFilter<'_>,
    ) -> DbResult<Vec<CurrentVersion>> {
        let conn = self.lock()?;
        let restrict = match filter {
            KeyFilter::All => false,
            KeyFilter::Keys(keys) => {
                Self::stage_keys(&conn, keys)?;
                true
            }
        };
        let query = sql::select_current_versions(table, restrict);
        let mut stmt = conn.prepare(&query)?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(surrogate_key, fingerprint, micros)| {
                Ok(CurrentVersion {
                    surrogate_key,
                    fingerprint,
                    valid_from: from_micros(micros)?,
                })
            })
            .collect()
    }

    async fn apply_history(
        &self,
        table: &str,
        layout: &TableLayout,
        changes: &HistoryChangeSet,
    ) -> DbResult<()> {
        self.apply_history_sync(table, layout, changes)
    }

    async fn check_history(&self, table: &str) -> DbResult<Vec<InvariantBreach>> {
        let conn = self.lock()?;
        Self::find_breaches(&conn, table, false)
    }
}

#[async_trait]
impl CurrentStateStore for DuckDbBackend {
    async fn ensure_current_table(
        &self,
        table: &str,
        layout: &TableLayout,
    ) -> DbResult<Vec<String>> {
        self.ensure_table(table, &sql::create_current_table(table, layout), layout)
    }

    async fn load_current_index(
        &self,
        table: &str,
        request: IndexRequest<'_>,
    ) -> DbResult<Vec<CurrentStateEntry>> {
        let conn = self.lock()?;
        Self::stage_keys(&conn, request.probe_keys)?;
        let query = sql::select_current_index(table, request.include_live, request.scope_sql);
        let mut stmt = conn.prepare(&query).map_err(|e| with_context(e, &query))?;
        let entries = stmt
            .query_map([], |row| {
                Ok(CurrentStateEntry {
                    surrogate_key: row.get(0)?,
                    fingerprint: row.get(1)?,
                    is_deleted: row.get(2)?,
                    in_scope: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    async fn apply_current(
        &self,
        table: &str,
        layout: &TableLayout,
        changes: &CurrentChangeSet,
    ) -> DbResult<()> {
        self.apply_current_sync(table, layout, changes)
    }
}

#[cfg(test)]
#[path = "duckdb_test.rs"]
mod tests;

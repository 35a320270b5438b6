//! hf-db - Store layer for histflow
//!
//! This crate provides the contracts through which the historical and
//! current-state relations are read and written, and their DuckDB
//! implementation.

pub mod changes;
pub mod duckdb;
pub mod error;
mod row_helpers;
mod sql;
pub mod traits;

pub use crate::duckdb::DuckDbBackend;
pub use changes::{
    CurrentChangeSet, CurrentWrite, HistoryChangeSet, HistoryClose, HistoryInsert, IndexRequest,
    KeyFilter,
};
pub use error::{DbError, DbResult};
pub use traits::{CurrentStateStore, DatabaseCore, HistoryStore, Store};

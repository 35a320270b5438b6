//! hf-core - Core library for histflow
//!
//! This crate provides the shared value model, surrogate keying and
//! fingerprinting, snapshot configuration, scope predicates, relation layouts,
//! and project discovery used across all histflow components.

pub mod batch;
pub mod config;
pub mod error;
pub mod keying;
pub mod layout;
pub mod project;
pub mod record;
pub mod run_result;
pub mod scope;
pub mod snapshot;
pub mod sql_utils;
pub mod value;

pub use batch::{BatchKind, SnapshotBatch};
pub use config::{Config, DatabaseConfig, DbType};
pub use error::{CoreError, CoreResult};
pub use keying::{compute_checksum, scd_id, KeyedRow, Keyer};
pub use layout::{ColumnDef, TableLayout};
pub use project::Project;
pub use record::{BreachKind, CurrentStateEntry, CurrentVersion, InvariantBreach};
pub use run_result::{RowRejection, RunCounts, RunResult, RunStatus};
pub use scope::ScopePredicate;
pub use snapshot::{discover_snapshots, DeletionPolicy, RetryConfig, Snapshot, SnapshotConfig};
pub use value::{Row, SqlType, Value};

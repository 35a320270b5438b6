//! hf-engine - Change-tracking engine for histflow
//!
//! This crate classifies snapshot batches against the current historical
//! state, writes the SCD Type 2 history and the current-state relation, and
//! coordinates one run at a time per key with retries and writer claims.

pub mod claims;
pub mod coordinator;
pub mod differ;
pub mod error;
pub mod retry;
pub mod temporal;
pub mod upsert;

pub use claims::{ClaimGuard, ClaimRegistry};
pub use coordinator::{RunCoordinator, RunOptions};
pub use differ::{classify, ChangeKind, ChangedRow, Classification, DiffOptions};
pub use error::{DuplicateKey, EngineError, EngineResult};
pub use retry::with_retry;
pub use temporal::TemporalMergeExecutor;
pub use upsert::{CurrentPlan, CurrentStateIndex, IncrementalUpsertExecutor};

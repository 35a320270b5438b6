//! Structured result of one engine run

use crate::batch::BatchKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A row skipped because it failed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRejection {
    /// Position of the row in the batch
    pub row_index: usize,
    /// Why the row was rejected
    pub reason: String,
}

/// Outcome of a successful run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every row was applied
    Succeeded,
    /// The run completed but some rows were rejected
    SucceededWithRejections,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::SucceededWithRejections => write!(f, "succeeded_with_rejections"),
        }
    }
}

/// Counts and identity of a completed run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Short unique run identifier
    pub run_id: String,
    /// Snapshot the run applied to
    pub snapshot: String,
    /// Logical instant shared by every write of the run
    pub run_timestamp: DateTime<Utc>,
    /// Extract kind of the applied batch
    pub batch_kind: BatchKind,
    /// Entities seen for the first time
    pub inserted: usize,
    /// Entities whose tracked attributes changed
    pub updated: usize,
    /// Historical versions closed (changes plus deletions)
    pub closed: usize,
    /// Entities whose tracked attributes did not change
    pub unchanged: usize,
    /// Entities soft-deleted because they vanished from a complete extract
    pub deleted: usize,
    /// Current-state rows re-synchronized after an interrupted earlier run
    pub repaired: usize,
    /// Rows skipped by validation
    pub rejected: Vec<RowRejection>,
}

/// Per-category counts handed to [`RunResult::new`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub inserted: usize,
    pub updated: usize,
    pub closed: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub repaired: usize,
}

impl RunResult {
    /// Assemble a result for a finished run
    pub fn new(
        snapshot: &str,
        run_timestamp: DateTime<Utc>,
        batch_kind: BatchKind,
        counts: RunCounts,
        rejected: Vec<RowRejection>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string()[..8].to_string(),
            snapshot: snapshot.to_string(),
            run_timestamp,
            batch_kind,
            inserted: counts.inserted,
            updated: counts.updated,
            closed: counts.closed,
            unchanged: counts.unchanged,
            deleted: counts.deleted,
            repaired: counts.repaired,
            rejected,
        }
    }

    /// Whether any rows were rejected
    pub fn status(&self) -> RunStatus {
        if self.rejected.is_empty() {
            RunStatus::Succeeded
        } else {
            RunStatus::SucceededWithRejections
        }
    }

    /// Whether the run wrote nothing
    pub fn is_noop(&self) -> bool {
        self.inserted == 0
            && self.updated == 0
            && self.closed == 0
            && self.deleted == 0
            && self.repaired == 0
    }
}

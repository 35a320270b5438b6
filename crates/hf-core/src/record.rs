//! Read-side views of the persisted relations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The current historical version of one entity, as much as the differ needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentVersion {
    /// Surrogate key
    pub surrogate_key: String,
    /// Fingerprint of the version's tracked attributes
    pub fingerprint: String,
    /// Start of the version's validity
    pub valid_from: DateTime<Utc>,
}

/// One row of the current-state relation, reduced to its bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentStateEntry {
    /// Surrogate key
    pub surrogate_key: String,
    /// Fingerprint of the stored payload
    pub fingerprint: String,
    /// Whether the row is a tombstone
    pub is_deleted: bool,
    /// Whether the row satisfies the snapshot's scope predicate
    pub in_scope: bool,
}

/// Kind of historical invariant breach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachKind {
    /// More than one version has `is_current = true`
    MultipleCurrent,
    /// `is_current` disagrees with `valid_to IS NULL`
    CurrentFlagMismatch,
    /// `valid_to <= valid_from`
    EmptyInterval,
    /// Consecutive versions overlap
    Overlap,
    /// Consecutive versions leave a gap not explained by a deletion
    Gap,
}

impl BreachKind {
    /// Parse the snake_case name used in SQL result sets
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "multiple_current" => Some(BreachKind::MultipleCurrent),
            "current_flag_mismatch" => Some(BreachKind::CurrentFlagMismatch),
            "empty_interval" => Some(BreachKind::EmptyInterval),
            "overlap" => Some(BreachKind::Overlap),
            "gap" => Some(BreachKind::Gap),
            _ => None,
        }
    }

    /// snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            BreachKind::MultipleCurrent => "multiple_current",
            BreachKind::CurrentFlagMismatch => "current_flag_mismatch",
            BreachKind::EmptyInterval => "empty_interval",
            BreachKind::Overlap => "overlap",
            BreachKind::Gap => "gap",
        }
    }
}

impl std::fmt::Display for BreachKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected violation of the historical relation's invariants
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvariantBreach {
    /// Entity affected
    pub surrogate_key: String,
    /// What is wrong
    pub kind: BreachKind,
}

impl std::fmt::Display for InvariantBreach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.surrogate_key, self.kind)
    }
}

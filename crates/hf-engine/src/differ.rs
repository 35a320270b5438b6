//! Snapshot differ: classifies every surrogate key of a batch and of the
//! current historical state as new, changed, unchanged, or missing.
//!
//! Classification is read-only and independent per key, so rows are split by
//! surrogate-key hash range and classified on blocking worker threads.

use crate::error::{DuplicateKey, EngineError, EngineResult};
use hf_core::{BatchKind, BreachKind, CurrentVersion, DeletionPolicy, InvariantBreach, KeyedRow};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Classification of one surrogate key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// In the batch, not in the current historical state
    New,
    /// In both, fingerprints differ
    Changed,
    /// In both, fingerprints equal
    Unchanged,
    /// In the current historical state, absent from a complete batch
    Missing,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::New => write!(f, "NEW"),
            ChangeKind::Changed => write!(f, "CHANGED"),
            ChangeKind::Unchanged => write!(f, "UNCHANGED"),
            ChangeKind::Missing => write!(f, "MISSING"),
        }
    }
}

/// A changed entity: the incoming row and the version it supersedes
#[derive(Debug, Clone, PartialEq)]
pub struct ChangedRow {
    /// Incoming row
    pub row: KeyedRow,
    /// Current historical version
    pub current: CurrentVersion,
}

/// Output of the differ. Every vector is sorted by surrogate key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub new: Vec<KeyedRow>,
    pub changed: Vec<ChangedRow>,
    pub unchanged: Vec<KeyedRow>,
    pub missing: Vec<CurrentVersion>,
}

impl Classification {
    /// Classification of a key, if the key was seen on either side
    pub fn kind_of(&self, surrogate_key: &str) -> Option<ChangeKind> {
        if self.new.iter().any(|r| r.surrogate_key == surrogate_key) {
            Some(ChangeKind::New)
        } else if self
            .changed
            .iter()
            .any(|c| c.row.surrogate_key == surrogate_key)
        {
            Some(ChangeKind::Changed)
        } else if self
            .unchanged
            .iter()
            .any(|r| r.surrogate_key == surrogate_key)
        {
            Some(ChangeKind::Unchanged)
        } else if self
            .missing
            .iter()
            .any(|c| c.surrogate_key == surrogate_key)
        {
            Some(ChangeKind::Missing)
        } else {
            None
        }
    }

    /// Surrogate keys classified as missing
    pub fn missing_keys(&self) -> Vec<String> {
        self.missing
            .iter()
            .map(|c| c.surrogate_key.clone())
            .collect()
    }

    fn merge(&mut self, other: Classification) {
        self.new.extend(other.new);
        self.changed.extend(other.changed);
        self.unchanged.extend(other.unchanged);
        self.missing.extend(other.missing);
    }

    fn sort(&mut self) {
        self.new.sort_by(|a, b| a.surrogate_key.cmp(&b.surrogate_key));
        self.changed
            .sort_by(|a, b| a.row.surrogate_key.cmp(&b.row.surrogate_key));
        self.unchanged
            .sort_by(|a, b| a.surrogate_key.cmp(&b.surrogate_key));
        self.missing
            .sort_by(|a, b| a.surrogate_key.cmp(&b.surrogate_key));
    }
}

/// Settings that decide whether and where MISSING may be inferred
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Complete or partial extract
    pub batch_kind: BatchKind,
    /// What happens to absent entities
    pub deletion_policy: DeletionPolicy,
    /// When set, only these keys may be classified MISSING
    pub missing_scope: Option<Arc<HashSet<String>>>,
    /// Number of hash-range partitions classified concurrently
    pub parallelism: usize,
}

impl DiffOptions {
    /// Whether absent keys are considered at all
    pub fn detects_missing(&self) -> bool {
        self.batch_kind.allows_missing() && self.deletion_policy.detects_missing()
    }
}

/// Keys that occur more than once, with every batch position, sorted by key
pub fn find_duplicate_keys(rows: &[KeyedRow]) -> Vec<DuplicateKey> {
    let mut positions: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for row in rows {
        positions
            .entry(row.surrogate_key.as_str())
            .or_default()
            .push(row.index);
    }
    positions
        .into_iter()
        .filter(|(_, rows)| rows.len() > 1)
        .map(|(key, rows)| DuplicateKey {
            surrogate_key: key.to_string(),
            rows,
        })
        .collect()
}

/// Index current versions by key.
///
/// More than one current version for a key is a persisted invariant breach;
/// every offending key is reported.
pub fn current_by_key(
    versions: Vec<CurrentVersion>,
) -> Result<HashMap<String, CurrentVersion>, Vec<InvariantBreach>> {
    let mut by_key: HashMap<String, CurrentVersion> = HashMap::with_capacity(versions.len());
    let mut breaches: Vec<InvariantBreach> = Vec::new();
    for version in versions {
        let key = version.surrogate_key.clone();
        if by_key.insert(key.clone(), version).is_some()
            && !breaches.iter().any(|b| b.surrogate_key == key)
        {
            breaches.push(InvariantBreach {
                surrogate_key: key,
                kind: BreachKind::MultipleCurrent,
            });
        }
    }
    if breaches.is_empty() {
        Ok(by_key)
    } else {
        breaches.sort();
        Err(breaches)
    }
}

/// Hash-range partition of a surrogate key.
///
/// Keys are hex digests, so the leading 16 bits are uniformly distributed.
fn partition_of(surrogate_key: &str, partitions: usize) -> usize {
    let prefix = surrogate_key.get(..4).unwrap_or(surrogate_key);
    let bucket = usize::from_str_radix(prefix, 16).unwrap_or(0) & 0xffff;
    bucket * partitions / 0x1_0000
}

/// Classify one partition. Consumes the partition's share of current versions.
fn classify_partition(
    rows: Vec<KeyedRow>,
    mut current: HashMap<String, CurrentVersion>,
    detect_missing: bool,
    missing_scope: Option<&HashSet<String>>,
) -> Classification {
    let mut out = Classification::default();
    for row in rows {
        match current.remove(&row.surrogate_key) {
            None => out.new.push(row),
            Some(version) if version.fingerprint == row.fingerprint => out.unchanged.push(row),
            Some(version) => out.changed.push(ChangedRow {
                row,
                current: version,
            }),
        }
    }
    if detect_missing {
        out.missing.extend(
            current
                .into_values()
                .filter(|v| missing_scope.map_or(true, |scope| scope.contains(&v.surrogate_key))),
        );
    }
    out
}

/// Classify a batch against the current historical state.
///
/// Fails with [`EngineError::DuplicateKeyInBatch`] before classifying anything
/// when a surrogate key repeats. The result does not depend on row order.
pub async fn classify(
    snapshot: &str,
    rows: Vec<KeyedRow>,
    current: HashMap<String, CurrentVersion>,
    options: &DiffOptions,
) -> EngineResult<Classification> {
    let duplicates = find_duplicate_keys(&rows);
    if !duplicates.is_empty() {
        return Err(EngineError::DuplicateKeyInBatch {
            snapshot: snapshot.to_string(),
            keys: duplicates,
        });
    }

    let detect_missing = options.detects_missing();
    let partitions = options.parallelism.max(1);

    let mut result = if partitions == 1 {
        classify_partition(
            rows,
            current,
            detect_missing,
            options.missing_scope.as_deref(),
        )
    } else {
        let mut row_parts: Vec<Vec<KeyedRow>> = (0..partitions).map(|_| Vec::new()).collect();
        for row in rows {
            row_parts[partition_of(&row.surrogate_key, partitions)].push(row);
        }
        let mut current_parts: Vec<HashMap<String, CurrentVersion>> =
            (0..partitions).map(|_| HashMap::new()).collect();
        for (key, version) in current {
            current_parts[partition_of(&key, partitions)].insert(key, version);
        }

        let mut handles = Vec::with_capacity(partitions);
        for (rows, current) in row_parts.into_iter().zip(current_parts) {
            let scope = options.missing_scope.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                classify_partition(rows, current, detect_missing, scope.as_deref())
            }));
        }

        let mut merged = Classification::default();
        for handle in handles {
            let part = handle
                .await
                .map_err(|e| EngineError::WorkerFailed(e.to_string()))?;
            merged.merge(part);
        }
        merged
    };

    result.sort();
    log::debug!(
        "Classified '{}': {} new, {} changed, {} unchanged, {} missing",
        snapshot,
        result.new.len(),
        result.changed.len(),
        result.unchanged.len(),
        result.missing.len()
    );
    Ok(result)
}

#[cfg(test)]
#[path = "differ_test.rs"]
mod tests;

//! Snapshot definitions for SCD Type 2 tracking
//!
//! A snapshot definition names the key and tracked attributes of a source,
//! the two relations the engine maintains for it, and the policies applied
//! when rows disappear from a complete extract.

use crate::batch::BatchKind;
use crate::error::{CoreError, CoreResult};
use crate::keying::Keyer;
use crate::layout::{TableLayout, COL_LAST_CHANGED_AT, RESERVED_COLUMNS};
use crate::scope::ScopePredicate;
use crate::value::{Row, SqlType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What happens to an entity that is absent from a complete extract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeletionPolicy {
    /// Absence is ignored
    #[default]
    None,
    /// Close the historical version and delete the current-state row
    Close,
    /// Close the historical version and flag the current-state row as deleted
    Tombstone,
}

impl DeletionPolicy {
    /// Whether absent keys are detected at all
    pub fn detects_missing(&self) -> bool {
        !matches!(self, DeletionPolicy::None)
    }
}

impl std::fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeletionPolicy::None => write!(f, "none"),
            DeletionPolicy::Close => write!(f, "close"),
            DeletionPolicy::Tombstone => write!(f, "tombstone"),
        }
    }
}

/// Bounded exponential backoff for transient store failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for any single delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay after the given failed attempt (1-based): doubles each time, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    fn validate(&self, snapshot: &str) -> CoreResult<()> {
        if self.max_attempts == 0 {
            return Err(CoreError::ConfigInvalid {
                message: format!("Snapshot '{}' retry.max_attempts must be >= 1", snapshot),
            });
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(CoreError::ConfigInvalid {
                message: format!(
                    "Snapshot '{}' retry.initial_backoff_ms exceeds retry.max_backoff_ms",
                    snapshot
                ),
            });
        }
        Ok(())
    }
}

/// Snapshot configuration from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotConfig {
    /// Snapshot name
    pub name: String,

    /// Relation to read the batch from when no batch file is given
    #[serde(default)]
    pub source: Option<String>,

    /// Schema for both maintained relations
    #[serde(default)]
    pub schema: Option<String>,

    /// Historical relation name (default: the snapshot name)
    #[serde(default)]
    pub history_table: Option<String>,

    /// Current-state relation name (default: `<name>_current`)
    #[serde(default)]
    pub current_table: Option<String>,

    /// Attributes that identify an entity across time
    #[serde(alias = "unique_key")]
    pub key_attributes: Vec<String>,

    /// Attributes whose changes open a new version
    #[serde(alias = "check_cols")]
    pub tracked_attributes: Vec<String>,

    /// Permit an attribute to be both a key and a tracked attribute
    #[serde(default)]
    pub allow_key_overlap: bool,

    /// Whether batches are complete or partial extracts
    pub extract: BatchKind,

    /// Handling of entities absent from a complete extract
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    /// Limits which current-state rows are considered for deletion
    #[serde(default)]
    pub scope: Option<ScopePredicate>,

    /// Fail the run on any rejected row instead of skipping it
    #[serde(default)]
    pub strict: bool,

    /// Accept null key attribute values
    #[serde(default)]
    pub allow_null_keys: bool,

    /// Storage type overrides per attribute
    #[serde(default)]
    pub column_types: BTreeMap<String, SqlType>,

    /// Retry policy for transient store errors
    #[serde(default)]
    pub retry: RetryConfig,

    /// Number of classification workers
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Description of the snapshot
    #[serde(default)]
    pub description: Option<String>,

    /// Tags for categorization
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Upper bound on classification workers per run
pub const MAX_PARALLELISM: usize = 256;

fn default_parallelism() -> usize {
    1
}

impl SnapshotConfig {
    /// Minimal configuration with defaults for every optional setting
    pub fn new(
        name: impl Into<String>,
        key_attributes: Vec<String>,
        tracked_attributes: Vec<String>,
        extract: BatchKind,
    ) -> Self {
        Self {
            name: name.into(),
            source: None,
            schema: None,
            history_table: None,
            current_table: None,
            key_attributes,
            tracked_attributes,
            allow_key_overlap: false,
            extract,
            deletion_policy: DeletionPolicy::default(),
            scope: None,
            strict: false,
            allow_null_keys: false,
            column_types: BTreeMap::new(),
            retry: RetryConfig::default(),
            parallelism: default_parallelism(),
            description: None,
            tags: Vec::new(),
        }
    }

    /// Validate the snapshot configuration
    pub fn validate(&self) -> CoreResult<()> {
        let invalid = |message: String| Err(CoreError::ConfigInvalid { message });

        if self.name.trim().is_empty() {
            return invalid("Snapshot name must not be empty".to_string());
        }
        if self.key_attributes.is_empty() {
            return invalid(format!(
                "Snapshot '{}' must have at least one key attribute",
                self.name
            ));
        }
        if self.tracked_attributes.is_empty() {
            return invalid(format!(
                "Snapshot '{}' must have at least one tracked attribute",
                self.name
            ));
        }

        for (label, list) in [
            ("key_attributes", &self.key_attributes),
            ("tracked_attributes", &self.tracked_attributes),
        ] {
            let mut seen = HashSet::new();
            for attribute in list {
                if attribute.trim().is_empty() {
                    return invalid(format!(
                        "Snapshot '{}' has an empty name in {}",
                        self.name, label
                    ));
                }
                if !seen.insert(attribute.as_str()) {
                    return invalid(format!(
                        "Snapshot '{}' lists '{}' twice in {}",
                        self.name, attribute, label
                    ));
                }
                if RESERVED_COLUMNS.contains(&attribute.as_str()) {
                    return invalid(format!(
                        "Snapshot '{}' uses reserved column name '{}' in {}",
                        self.name, attribute, label
                    ));
                }
            }
        }

        if !self.allow_key_overlap {
            if let Some(overlap) = self
                .tracked_attributes
                .iter()
                .find(|a| self.key_attributes.contains(a))
            {
                return invalid(format!(
                    "Snapshot '{}' tracks key attribute '{}' (set allow_key_overlap to permit)",
                    self.name, overlap
                ));
            }
        }

        if let Some(unknown) = self
            .column_types
            .keys()
            .find(|c| !self.key_attributes.contains(c) && !self.tracked_attributes.contains(c))
        {
            return invalid(format!(
                "Snapshot '{}' declares a type for '{}', which is neither a key nor tracked attribute",
                self.name, unknown
            ));
        }

        if let Some(scope) = &self.scope {
            let mut allowed: Vec<&str> = self
                .key_attributes
                .iter()
                .chain(&self.tracked_attributes)
                .map(String::as_str)
                .collect();
            allowed.push(COL_LAST_CHANGED_AT);
            scope.validate(&allowed).map_err(|e| match e {
                CoreError::ConfigInvalid { message } => CoreError::ConfigInvalid {
                    message: format!("Snapshot '{}': {}", self.name, message),
                },
                other => other,
            })?;
        }

        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return invalid(format!(
                "Snapshot '{}' parallelism must be between 1 and {} (got {})",
                self.name, MAX_PARALLELISM, self.parallelism
            ));
        }

        self.retry.validate(&self.name)?;

        if self.history_table_name() == self.current_table_name() {
            return invalid(format!(
                "Snapshot '{}' history and current-state tables must differ",
                self.name
            ));
        }

        Ok(())
    }

    fn qualify(&self, table: &str) -> String {
        if table.contains('.') {
            return table.to_string();
        }
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, table),
            None => table.to_string(),
        }
    }

    /// Qualified name of the historical relation
    pub fn history_table_name(&self) -> String {
        self.qualify(self.history_table.as_deref().unwrap_or(&self.name))
    }

    /// Qualified name of the current-state relation
    pub fn current_table_name(&self) -> String {
        match &self.current_table {
            Some(t) => self.qualify(t),
            None => self.qualify(&format!("{}_current", self.name)),
        }
    }

    /// Keyer for this snapshot's attribute lists
    pub fn keyer(&self) -> Keyer {
        Keyer::new(
            self.key_attributes.clone(),
            self.tracked_attributes.clone(),
            self.allow_null_keys,
        )
    }

    /// Column layout for the maintained relations given an incoming batch
    pub fn layout(&self, rows: &[Row]) -> TableLayout {
        TableLayout::resolve(
            &self.key_attributes,
            &self.tracked_attributes,
            &self.column_types,
            rows,
        )
    }
}

/// A snapshot file containing one or more snapshot configurations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// Schema version
    #[serde(default = "default_version")]
    pub version: u32,

    /// List of snapshots defined in this file
    pub snapshots: Vec<SnapshotConfig>,
}

fn default_version() -> u32 {
    1
}

impl SnapshotFile {
    /// Load snapshot configuration from a YAML file
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        let file: SnapshotFile =
            serde_yaml::from_str(&content).map_err(|e| CoreError::ConfigParseError {
                message: format!("{}: {}", path.display(), e),
            })?;

        for snapshot in &file.snapshots {
            snapshot.validate()?;
        }

        Ok(file)
    }
}

/// Represents a loaded snapshot ready for execution
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Snapshot name
    pub name: String,

    /// Path to the snapshot YAML file
    pub path: PathBuf,

    /// Snapshot configuration
    pub config: SnapshotConfig,
}

impl Snapshot {
    /// Create a new snapshot from config
    pub fn new(config: SnapshotConfig, path: PathBuf) -> Self {
        Self {
            name: config.name.clone(),
            path,
            config,
        }
    }
}

/// Discover snapshots from snapshot paths
///
/// Walks each directory recursively for `.yml`/`.yaml` files. Snapshot names
/// must be unique across the whole project.
pub fn discover_snapshots(
    project_root: &Path,
    snapshot_paths: &[String],
) -> CoreResult<Vec<Snapshot>> {
    let mut snapshots = Vec::new();

    for snapshot_path in snapshot_paths {
        let dir = project_root.join(snapshot_path);
        if !dir.exists() {
            log::debug!("Snapshot path {} does not exist, skipping", dir.display());
            continue;
        }
        discover_in_dir(&dir, &mut snapshots)?;
    }

    let mut seen: HashMap<&str, &Path> = HashMap::new();
    for snapshot in &snapshots {
        if let Some(first) = seen.insert(snapshot.name.as_str(), snapshot.path.as_path()) {
            return Err(CoreError::DuplicateSnapshot {
                name: snapshot.name.clone(),
                path1: first.display().to_string(),
                path2: snapshot.path.display().to_string(),
            });
        }
    }

    snapshots.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(snapshots)
}

fn discover_in_dir(dir: &Path, snapshots: &mut Vec<Snapshot>) -> CoreResult<()> {
    let io_err = |e| CoreError::IoWithPath {
        path: dir.display().to_string(),
        source: e,
    };
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_dir() {
            discover_in_dir(&path, snapshots)?;
            continue;
        }
        if !path.extension().is_some_and(|e| e == "yml" || e == "yaml") {
            continue;
        }
        let snapshot_file = SnapshotFile::load(&path)?;
        for config in snapshot_file.snapshots {
            snapshots.push(Snapshot::new(config, path.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "snapshot_test.rs"]
mod tests;

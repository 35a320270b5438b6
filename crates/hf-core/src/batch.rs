//! Snapshot batches handed to the engine once per run

use crate::error::{CoreError, CoreResult};
use crate::value::Row;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Whether a batch is a complete extract of the source or a window of it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    /// Complete extract: absence of a key means the entity is gone
    Full,
    /// Partial or windowed extract: absence means nothing
    Partial,
}

impl BatchKind {
    /// Whether absent keys may be classified as missing
    pub fn allows_missing(&self) -> bool {
        matches!(self, BatchKind::Full)
    }
}

impl std::fmt::Display for BatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchKind::Full => write!(f, "full"),
            BatchKind::Partial => write!(f, "partial"),
        }
    }
}

impl std::str::FromStr for BatchKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(BatchKind::Full),
            "partial" => Ok(BatchKind::Partial),
            other => Err(CoreError::ConfigInvalid {
                message: format!("unknown batch kind '{}' (expected full or partial)", other),
            }),
        }
    }
}

/// The rows supplied for one run, tagged with their extract kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBatch {
    /// Extract kind
    pub kind: BatchKind,
    /// Incoming rows; order carries no meaning
    pub rows: Vec<Row>,
}

/// On-disk JSON shapes accepted for a batch
#[derive(Deserialize)]
#[serde(untagged)]
enum BatchFile {
    Tagged {
        kind: Option<BatchKind>,
        rows: Vec<Row>,
    },
    Rows(Vec<Row>),
}

impl SnapshotBatch {
    /// Create a batch
    pub fn new(kind: BatchKind, rows: Vec<Row>) -> Self {
        Self { kind, rows }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the batch has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Load a batch from a JSON file.
    ///
    /// Accepts either a bare array of row objects or an object with `rows`
    /// and an optional `kind`. A kind in the file wins over `fallback_kind`;
    /// if neither is present the load fails, since guessing would risk
    /// treating a partial extract as complete.
    pub fn load_json(path: &Path, fallback_kind: Option<BatchKind>) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        let parsed: BatchFile =
            serde_json::from_str(&content).map_err(|e| CoreError::InvalidBatch {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        let (kind, rows) = match parsed {
            BatchFile::Tagged { kind, rows } => (kind.or(fallback_kind), rows),
            BatchFile::Rows(rows) => (fallback_kind, rows),
        };
        let kind = kind.ok_or_else(|| CoreError::InvalidBatch {
            path: path.display().to_string(),
            message: "batch kind is not set (use \"kind\": \"full\" or \"partial\")".to_string(),
        })?;
        log::debug!(
            "Loaded {} batch with {} rows from {}",
            kind,
            rows.len(),
            path.display()
        );
        Ok(Self { kind, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use tempfile::TempDir;

    #[test]
    fn test_load_tagged_batch() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("batch.json");
        std::fs::write(
            &path,
            r#"{"kind": "partial", "rows": [{"id": 1, "name": "a"}]}"#,
        )
        .unwrap();

        let batch = SnapshotBatch::load_json(&path, Some(BatchKind::Full)).unwrap();
        assert_eq!(batch.kind, BatchKind::Partial);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.rows[0]["id"], Value::Int(1));
    }

    #[test]
    fn test_load_bare_array_uses_fallback_kind() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("batch.json");
        std::fs::write(&path, r#"[{"id": 1}, {"id": 2}]"#).unwrap();

        let batch = SnapshotBatch::load_json(&path, Some(BatchKind::Full)).unwrap();
        assert_eq!(batch.kind, BatchKind::Full);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_load_without_any_kind_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("batch.json");
        std::fs::write(&path, r#"[{"id": 1}]"#).unwrap();

        let err = SnapshotBatch::load_json(&path, None).unwrap_err();
        assert!(matches!(err, CoreError::InvalidBatch { .. }));
    }

    #[test]
    fn test_batch_kind_from_str() {
        assert_eq!("FULL".parse::<BatchKind>().unwrap(), BatchKind::Full);
        assert_eq!("partial".parse::<BatchKind>().unwrap(), BatchKind::Partial);
        assert!("weekly".parse::<BatchKind>().is_err());
        assert!(BatchKind::Full.allows_missing());
        assert!(!BatchKind::Partial.allows_missing());
    }
}

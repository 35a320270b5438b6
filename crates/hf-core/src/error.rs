//! Error types for hf-core

use thiserror::Error;

/// Core error type for histflow
#[derive(Error, Debug)]
pub enum CoreError {
    /// E001: Configuration file not found
    #[error("[E001] Config file not found: {path}")]
    ConfigNotFound { path: String },

    /// E002: Failed to parse configuration file
    #[error("[E002] Failed to parse config: {message}")]
    ConfigParseError { message: String },

    /// E003: Invalid configuration value
    #[error("[E003] Invalid config: {message}")]
    ConfigInvalid { message: String },

    /// E004: Project directory not found
    #[error("[E004] Project directory not found: {path}")]
    ProjectNotFound { path: String },

    /// E005: Snapshot definition not found
    #[error("[E005] Snapshot not found: {name}")]
    SnapshotNotFound { name: String },

    /// E006: Two snapshot definitions share a name
    #[error("[E006] Duplicate snapshot name '{name}' in {path1} and {path2}")]
    DuplicateSnapshot {
        name: String,
        path1: String,
        path2: String,
    },

    /// E007: Batch file could not be interpreted
    #[error("[E007] Invalid snapshot batch in {path}: {message}")]
    InvalidBatch { path: String, message: String },

    /// K001: A configured key attribute is absent from an incoming row
    #[error("[K001] Row is missing key attribute '{attribute}'")]
    MissingKeyAttribute { attribute: String },

    /// K002: A configured key attribute is null on an incoming row
    #[error("[K002] Row has null key attribute '{attribute}'")]
    NullKeyAttribute { attribute: String },

    /// E014: IO error
    #[error("[E014] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// E016: IO error with file path context
    #[error("[E016] Failed to read '{path}': {source}")]
    IoWithPath {
        path: String,
        source: std::io::Error,
    },

    /// E015: YAML parse error
    #[error("[E015] YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Whether this error concerns a single incoming row rather than the run.
    pub fn is_row_error(&self) -> bool {
        matches!(
            self,
            CoreError::MissingKeyAttribute { .. } | CoreError::NullKeyAttribute { .. }
        )
    }
}

/// Result type alias for CoreError
pub type CoreResult<T> = Result<T, CoreError>;

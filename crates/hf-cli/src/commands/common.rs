//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hf_core::{Config, Project};
use hf_db::{DuckDbBackend, Store};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::cli::GlobalArgs;

/// Error type representing a non-zero process exit code.
///
/// Use `return Err(ExitCode(N).into())` instead of `std::process::exit(N)`
/// so that RAII destructors run and cleanup happens properly.
#[derive(Debug)]
pub(crate) struct ExitCode(pub(crate) i32);

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Control flow only; main.rs maps it to the process status silently.
        write!(f, "")
    }
}

impl std::error::Error for ExitCode {}

/// Load the project named by `--project-dir`
pub(crate) fn load_project(global: &GlobalArgs) -> Result<Project> {
    Project::load(Path::new(&global.project_dir)).context("Failed to load project")
}

/// Open the store for the resolved target (`--target`, then `HF_TARGET`).
///
/// Relative database paths are taken from the project root.
pub(crate) fn create_store(project: &Project, target: Option<&str>) -> Result<Arc<dyn Store>> {
    let resolved_target = Config::resolve_target(target);
    let db_config = project
        .config
        .get_database_config(resolved_target.as_deref())
        .context("Failed to get database configuration")?;

    let path = if db_config.path == ":memory:" || Path::new(&db_config.path).is_absolute() {
        db_config.path.clone()
    } else {
        let path = project.root.join(&db_config.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        path.display().to_string()
    };
    log::debug!("Opening {} database at {}", db_config.db_type, path);

    let store: Arc<dyn Store> =
        Arc::new(DuckDbBackend::new(&path).context("Failed to connect to database")?);
    Ok(store)
}

/// Envelope of a results file: timestamp, elapsed time, counts, and items
#[derive(Debug, Clone, Serialize)]
pub(crate) struct CommandResults<T: Serialize> {
    pub timestamp: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<T>,
}

/// Serialize `data` as pretty-printed JSON and write it to `path`.
///
/// Creates any missing parent directories before writing.
pub(crate) fn write_json_results<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create target directory")?;
    }
    let json = serde_json::to_string_pretty(data).context("Failed to serialize results")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Column widths: the widest of the header and every cell
pub(crate) fn calculate_column_widths(headers: &[&str], rows: &[Vec<String>]) -> Vec<usize> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.chars().count());
        }
    }
    widths
}

/// Print a left-aligned table with a dashed separator under the header
pub(crate) fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let widths = calculate_column_widths(headers, rows);

    let header_parts: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(h, &w)| format!("{:<width$}", h, width = w))
        .collect();
    println!("{}", header_parts.join("  ").trim_end());

    let sep_parts: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", sep_parts.join("  "));

    for row in rows {
        let row_parts: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, &w)| format!("{:<width$}", cell, width = w))
            .collect();
        println!("{}", row_parts.join("  ").trim_end());
    }
}

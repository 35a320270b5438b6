//! Run command implementation - apply one batch per selected snapshot

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use hf_core::sql_utils::quote_qualified;
use hf_core::{BatchKind, Project, RunResult, RunStatus, Snapshot, SnapshotBatch};
use hf_db::Store;
use hf_engine::{RunCoordinator, RunOptions};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::cli::{GlobalArgs, RunArgs};
use crate::commands::common::{self, CommandResults, ExitCode};

/// Outcome of one snapshot as recorded in `run_results.json`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SnapshotStatus {
    Success,
    SuccessWithRejections,
    Error,
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotStatus::Success => write!(f, "success"),
            SnapshotStatus::SuccessWithRejections => write!(f, "success_with_rejections"),
            SnapshotStatus::Error => write!(f, "error"),
        }
    }
}

/// Run result for a single snapshot
#[derive(Debug, Clone, Serialize)]
struct SnapshotRunResult {
    snapshot: String,
    status: SnapshotStatus,
    duration_secs: f64,
    result: Option<RunResult>,
    error: Option<String>,
}

/// Execute the run command
pub async fn execute(args: &RunArgs, global: &GlobalArgs) -> Result<()> {
    let start_time = Instant::now();
    let project = common::load_project(global)?;

    let selected = project
        .select_snapshots(args.snapshots.as_deref())
        .context("Failed to select snapshots")?;
    if selected.is_empty() {
        println!("No snapshots found in configured paths");
        return Ok(());
    }
    if (args.input.is_some() || args.csv.is_some()) && selected.len() != 1 {
        bail!(
            "--input and --csv supply one batch; select exactly one snapshot with --snapshots ({} selected)",
            selected.len()
        );
    }

    let run_timestamp = args
        .run_timestamp
        .as_deref()
        .map(parse_run_timestamp)
        .transpose()?;

    let store = common::create_store(&project, global.target.as_deref())?;
    let coordinator = RunCoordinator::new(store.clone());
    let cancel = cancel_on_interrupt();

    println!("Running {} snapshots...\n", selected.len());

    let mut success_count = 0;
    let mut failure_count = 0;
    let mut run_results: Vec<SnapshotRunResult> = Vec::with_capacity(selected.len());

    for snapshot in selected {
        let snapshot_start = Instant::now();
        log::debug!(
            "Running snapshot {} (history: {}, current: {})",
            snapshot.name,
            snapshot.config.history_table_name(),
            snapshot.config.current_table_name()
        );

        let options = RunOptions {
            run_timestamp,
            cancel: Some(cancel.clone()),
        };
        let outcome = match load_batch(store.as_ref(), snapshot, args).await {
            Ok(batch) => coordinator
                .run(&snapshot.config, batch, options)
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };
        let duration = snapshot_start.elapsed();

        match outcome {
            Ok(result) => {
                success_count += 1;
                let status = match result.status() {
                    RunStatus::Succeeded => SnapshotStatus::Success,
                    RunStatus::SucceededWithRejections => SnapshotStatus::SuccessWithRejections,
                };
                println!(
                    "  ✓ {} (inserted: {}, updated: {}, closed: {}, unchanged: {}, deleted: {}) [{}ms]",
                    snapshot.name,
                    result.inserted,
                    result.updated,
                    result.closed,
                    result.unchanged,
                    result.deleted,
                    duration.as_millis()
                );
                if result.repaired > 0 {
                    println!("    repaired {} current-state rows", result.repaired);
                }
                for rejection in &result.rejected {
                    println!(
                        "    rejected row {}: {}",
                        rejection.row_index, rejection.reason
                    );
                }
                run_results.push(SnapshotRunResult {
                    snapshot: snapshot.name.clone(),
                    status,
                    duration_secs: duration.as_secs_f64(),
                    result: Some(result),
                    error: None,
                });
            }
            Err(e) => {
                failure_count += 1;
                println!(
                    "  ✗ {} - {:#} [{}ms]",
                    snapshot.name,
                    e,
                    duration.as_millis()
                );
                run_results.push(SnapshotRunResult {
                    snapshot: snapshot.name.clone(),
                    status: SnapshotStatus::Error,
                    duration_secs: duration.as_secs_f64(),
                    result: None,
                    error: Some(format!("{:#}", e)),
                });
            }
        }
    }

    write_run_results(&project, run_results, start_time, success_count, failure_count)?;

    println!();
    println!(
        "Completed: {} succeeded, {} failed",
        success_count, failure_count
    );
    println!("Total time: {}ms", start_time.elapsed().as_millis());

    if failure_count > 0 {
        return Err(ExitCode(4).into());
    }
    Ok(())
}

/// Flag raised on Ctrl-C; runs check it up to their first write
fn cancel_on_interrupt() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, cancelling runs that have not started writing");
            flag.store(true, Ordering::SeqCst);
        }
    });
    cancel
}

fn parse_run_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .with_context(|| format!("Invalid --run-timestamp '{}' (expected RFC 3339)", value))
}

/// Batch for a snapshot from `--input`, `--csv`, or its `source` relation.
///
/// Kind precedence: the JSON file, then `--kind`, then the snapshot's `extract`.
async fn load_batch(store: &dyn Store, snapshot: &Snapshot, args: &RunArgs) -> Result<SnapshotBatch> {
    let kind = args
        .kind
        .map(BatchKind::from)
        .unwrap_or(snapshot.config.extract);

    if let Some(input) = &args.input {
        return SnapshotBatch::load_json(Path::new(input), Some(kind))
            .with_context(|| format!("Failed to load batch from {}", input));
    }
    if let Some(csv) = &args.csv {
        let rows = store
            .read_csv_rows(csv)
            .await
            .with_context(|| format!("Failed to load batch from {}", csv))?;
        return Ok(SnapshotBatch::new(kind, rows));
    }
    let Some(source) = &snapshot.config.source else {
        bail!(
            "Snapshot '{}' has no source; pass --input or --csv",
            snapshot.name
        );
    };
    let sql = format!("SELECT * FROM {}", quote_qualified(source));
    let rows = store
        .query_rows(&sql)
        .await
        .with_context(|| format!("Failed to read source {}", source))?;
    Ok(SnapshotBatch::new(kind, rows))
}

/// Write `run_results.json` to the target directory
fn write_run_results(
    project: &Project,
    results: Vec<SnapshotRunResult>,
    start_time: Instant,
    success_count: usize,
    failure_count: usize,
) -> Result<()> {
    let results = CommandResults {
        timestamp: Utc::now(),
        elapsed_secs: start_time.elapsed().as_secs_f64(),
        success_count,
        failure_count,
        results,
    };
    common::write_json_results(&project.target_dir().join("run_results.json"), &results)
}

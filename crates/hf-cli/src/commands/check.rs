//! Check command implementation - scan historical tables for invariant breaches

use anyhow::{Context, Result};
use hf_engine::RunCoordinator;

use crate::cli::{CheckArgs, GlobalArgs};
use crate::commands::common::{self, ExitCode};

/// Execute the check command
pub async fn execute(args: &CheckArgs, global: &GlobalArgs) -> Result<()> {
    let project = common::load_project(global)?;
    let selected = project
        .select_snapshots(args.snapshots.as_deref())
        .context("Failed to select snapshots")?;
    if selected.is_empty() {
        println!("No snapshots found in configured paths");
        return Ok(());
    }

    let store = common::create_store(&project, global.target.as_deref())?;
    let coordinator = RunCoordinator::new(store);

    println!("Checking {} snapshots...\n", selected.len());
    let mut breached = 0;
    for snapshot in selected {
        let table = snapshot.config.history_table_name();
        let breaches = coordinator
            .check(&snapshot.config)
            .await
            .with_context(|| format!("Failed to check {}", table))?;
        if breaches.is_empty() {
            println!("  ✓ {} ({})", snapshot.name, table);
            continue;
        }
        breached += 1;
        println!(
            "  ✗ {} ({}): {} breaches",
            snapshot.name,
            table,
            breaches.len()
        );
        for breach in &breaches {
            println!("    {}", breach);
        }
    }

    println!();
    if breached > 0 {
        println!("Check failed: {} snapshots with breaches", breached);
        return Err(ExitCode(1).into());
    }
    println!("Check passed");
    Ok(())
}

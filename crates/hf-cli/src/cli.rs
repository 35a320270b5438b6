//! CLI argument definitions using clap derive API

use clap::{Args, Parser, Subcommand, ValueEnum};
use hf_core::BatchKind;

/// histflow - SCD Type 2 history and current-state tables from snapshot extracts
#[derive(Parser, Debug)]
#[command(name = "hf")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all commands
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to project directory
    #[arg(short = 'p', long, global = true, default_value = ".")]
    pub project_dir: String,

    /// Override target (database connection)
    #[arg(short, long, global = true)]
    pub target: Option<String>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply a snapshot batch to history and current state
    Run(RunArgs),

    /// Validate project and snapshot definitions
    Validate(ValidateArgs),

    /// Check historical tables for invariant breaches
    Check(CheckArgs),

    /// Print a snapshot's historical or current-state table
    History(HistoryArgs),
}

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Snapshot names to run (comma-separated, default: all)
    #[arg(short, long)]
    pub snapshots: Option<String>,

    /// Read the batch from a JSON file (array of rows, or {kind, rows})
    #[arg(short, long, conflicts_with = "csv")]
    pub input: Option<String>,

    /// Read the batch from a CSV file
    #[arg(long)]
    pub csv: Option<String>,

    /// Batch kind, overriding the snapshot's extract setting
    #[arg(short, long, value_enum)]
    pub kind: Option<KindArg>,

    /// Logical run timestamp (RFC 3339, default: now)
    #[arg(long)]
    pub run_timestamp: Option<String>,
}

/// Batch kind on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindArg {
    /// Complete extract; absent keys may be deleted
    Full,
    /// Partial extract; absent keys are left alone
    Partial,
}

impl From<KindArg> for BatchKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Full => BatchKind::Full,
            KindArg::Partial => BatchKind::Partial,
        }
    }
}

/// Arguments for the validate command
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Snapshot names to validate (comma-separated, default: all)
    #[arg(short, long)]
    pub snapshots: Option<String>,
}

/// Arguments for the check command
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Snapshot names to check (comma-separated, default: all)
    #[arg(short, long)]
    pub snapshots: Option<String>,
}

/// Arguments for the history command
#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Snapshot name
    pub snapshot: String,

    /// Print the current-state table instead of the history
    #[arg(long)]
    pub current: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub output: HistoryOutput,
}

/// History output formats
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOutput {
    /// Aligned text table
    Table,
    /// JSON array of rows
    Json,
}

#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;

//! Validate command implementation
//!
//! Per-snapshot configuration errors already fail project loading; this
//! command adds the checks that span snapshots and the settings that are
//! valid but probably not what the author meant.

use anyhow::Result;
use hf_core::{BatchKind, DeletionPolicy, Snapshot};
use std::collections::HashMap;

use crate::cli::{GlobalArgs, ValidateArgs};
use crate::commands::common::{load_project, ExitCode};

/// Validation result severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Severity {
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A single validation issue
struct ValidationIssue {
    severity: Severity,
    code: &'static str,
    message: String,
    file: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}: {} ({})",
            self.severity, self.code, self.message, self.file
        )
    }
}

/// Collect validation issues
#[derive(Default)]
struct ValidationContext {
    issues: Vec<ValidationIssue>,
}

impl ValidationContext {
    fn push(
        &mut self,
        severity: Severity,
        code: &'static str,
        message: String,
        snapshot: &Snapshot,
    ) {
        self.issues.push(ValidationIssue {
            severity,
            code,
            message,
            file: snapshot.path.display().to_string(),
        });
    }

    fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count()
    }
}

/// Execute the validate command
pub async fn execute(args: &ValidateArgs, global: &GlobalArgs) -> Result<()> {
    let project = load_project(global)?;
    println!("Validating project: {}\n", project.config.name);

    let selected = project.select_snapshots(args.snapshots.as_deref())?;
    for snapshot in &selected {
        println!(
            "  ✓ {} ({} extract, deletion policy {}) -> {}, {}",
            snapshot.name,
            snapshot.config.extract,
            snapshot.config.deletion_policy,
            snapshot.config.history_table_name(),
            snapshot.config.current_table_name()
        );
    }

    let mut ctx = ValidationContext::default();
    let all: Vec<&Snapshot> = project.snapshots.iter().collect();
    validate_relation_ownership(&all, &mut ctx);
    validate_settings(&selected, &mut ctx);

    println!();
    for issue in &ctx.issues {
        println!("{}", issue);
    }
    let (errors, warnings) = (ctx.error_count(), ctx.warning_count());
    if errors == 0 {
        println!(
            "Validation passed: {} snapshots, {} warnings",
            selected.len(),
            warnings
        );
        Ok(())
    } else {
        println!(
            "Validation failed: {} errors, {} warnings",
            errors, warnings
        );
        Err(ExitCode(1).into())
    }
}

/// Every relation must be written by exactly one snapshot
fn validate_relation_ownership(snapshots: &[&Snapshot], ctx: &mut ValidationContext) {
    let mut owners: HashMap<String, &str> = HashMap::new();
    for snapshot in snapshots {
        for table in [
            snapshot.config.history_table_name(),
            snapshot.config.current_table_name(),
        ] {
            let key = table.to_ascii_lowercase();
            match owners.get(&key).copied() {
                Some(owner) if owner != snapshot.name => ctx.push(
                    Severity::Error,
                    "V001",
                    format!(
                        "Relation '{}' of snapshot '{}' is also written by snapshot '{}'",
                        table, snapshot.name, owner
                    ),
                    snapshot,
                ),
                _ => {
                    owners.insert(key, &snapshot.name);
                }
            }
        }
    }
}

/// Valid combinations that never do what they appear to
fn validate_settings(snapshots: &[&Snapshot], ctx: &mut ValidationContext) {
    for snapshot in snapshots {
        let config = &snapshot.config;
        if config.extract == BatchKind::Partial && config.deletion_policy.detects_missing() {
            ctx.push(
                Severity::Warning,
                "V002",
                format!(
                    "Snapshot '{}' has deletion policy {} but a partial extract; deletions only apply to full batches",
                    snapshot.name, config.deletion_policy
                ),
                snapshot,
            );
        }
        if config.scope.is_some() && config.deletion_policy == DeletionPolicy::None {
            ctx.push(
                Severity::Warning,
                "V003",
                format!(
                    "Snapshot '{}' sets a scope but no deletion policy; the scope is unused",
                    snapshot.name
                ),
                snapshot,
            );
        }
        if config.source.is_none() {
            ctx.push(
                Severity::Warning,
                "V004",
                format!(
                    "Snapshot '{}' has no source; runs need --input or --csv",
                    snapshot.name
                ),
                snapshot,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hf_core::SnapshotConfig;
    use std::path::PathBuf;

    fn snapshot(name: &str, extract: BatchKind) -> Snapshot {
        let mut config = SnapshotConfig::new(
            name,
            vec!["id".to_string()],
            vec!["name".to_string()],
            extract,
        );
        config.source = Some(format!("raw_{}", name));
        Snapshot::new(config, PathBuf::from(format!("snapshots/{}.yml", name)))
    }

    #[test]
    fn test_shared_relation_is_an_error() {
        let a = snapshot("snap_a", BatchKind::Full);
        let mut b = snapshot("snap_b", BatchKind::Full);
        b.config.current_table = Some("SNAP_A_current".to_string());

        let mut ctx = ValidationContext::default();
        validate_relation_ownership(&[&a, &b], &mut ctx);
        assert_eq!(ctx.error_count(), 1);
        assert_eq!(ctx.issues[0].code, "V001");
        assert!(ctx.issues[0].message.contains("snap_a"));
    }

    #[test]
    fn test_distinct_relations_pass() {
        let a = snapshot("snap_a", BatchKind::Full);
        let b = snapshot("snap_b", BatchKind::Partial);
        let mut ctx = ValidationContext::default();
        validate_relation_ownership(&[&a, &b], &mut ctx);
        validate_settings(&[&a, &b], &mut ctx);
        assert!(ctx.issues.is_empty());
    }

    #[test]
    fn test_suspicious_settings_warn() {
        let mut partial = snapshot("snap_p", BatchKind::Partial);
        partial.config.deletion_policy = DeletionPolicy::Close;
        let mut sourceless = snapshot("snap_s", BatchKind::Full);
        sourceless.config.source = None;

        let mut ctx = ValidationContext::default();
        validate_settings(&[&partial, &sourceless], &mut ctx);
        let codes: Vec<&str> = ctx.issues.iter().map(|i| i.code).collect();
        assert_eq!(codes, vec!["V002", "V004"]);
        assert_eq!(ctx.error_count(), 0);
        assert_eq!(ctx.warning_count(), 2);
    }
}

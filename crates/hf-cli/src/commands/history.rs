//! History command implementation - print a snapshot's maintained tables

use anyhow::{Context, Result};
use hf_core::layout::{
    COL_IS_CURRENT, COL_IS_DELETED, COL_LAST_CHANGED_AT, COL_VALID_FROM, COL_VALID_TO,
};
use hf_core::sql_utils::{quote_ident, quote_qualified};
use hf_core::{SnapshotConfig, Value};

use crate::cli::{GlobalArgs, HistoryArgs, HistoryOutput};
use crate::commands::common;

/// Execute the history command
pub async fn execute(args: &HistoryArgs, global: &GlobalArgs) -> Result<()> {
    let project = common::load_project(global)?;
    let snapshot = project.snapshot(&args.snapshot)?;
    let store = common::create_store(&project, global.target.as_deref())?;

    let (table, columns) = if args.current {
        (snapshot.config.current_table_name(), current_columns(&snapshot.config))
    } else {
        (snapshot.config.history_table_name(), history_columns(&snapshot.config))
    };

    if !store.relation_exists(&table).await? {
        println!("{} does not exist yet; run the snapshot first", table);
        return Ok(());
    }

    let sql = select_sql(&table, &columns, &snapshot.config, args.current);
    let rows = store
        .query_rows(&sql)
        .await
        .with_context(|| format!("Failed to read {}", table))?;

    match args.output {
        HistoryOutput::Json => {
            let json = serde_json::to_string_pretty(&rows).context("Failed to serialize rows")?;
            println!("{}", json);
        }
        HistoryOutput::Table => {
            let headers: Vec<String> = columns.iter().map(|c| c.to_uppercase()).collect();
            let headers: Vec<&str> = headers.iter().map(String::as_str).collect();
            let cells: Vec<Vec<String>> = rows
                .iter()
                .map(|row| {
                    columns
                        .iter()
                        .map(|c| row.get(c.as_str()).map(render).unwrap_or_default())
                        .collect()
                })
                .collect();
            common::print_table(&headers, &cells);
            println!("\n{} rows", rows.len());
        }
    }
    Ok(())
}

fn attribute_columns(config: &SnapshotConfig) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for name in config.key_attributes.iter().chain(&config.tracked_attributes) {
        if !columns.contains(name) {
            columns.push(name.clone());
        }
    }
    columns
}

fn history_columns(config: &SnapshotConfig) -> Vec<String> {
    let mut columns = attribute_columns(config);
    columns.extend(
        [COL_VALID_FROM, COL_VALID_TO, COL_IS_CURRENT, COL_IS_DELETED].map(String::from),
    );
    columns
}

fn current_columns(config: &SnapshotConfig) -> Vec<String> {
    let mut columns = attribute_columns(config);
    columns.extend([COL_LAST_CHANGED_AT, COL_IS_DELETED].map(String::from));
    columns
}

/// Rows of one entity stay together; history rows are in time order
fn select_sql(table: &str, columns: &[String], config: &SnapshotConfig, current: bool) -> String {
    let select: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let mut order: Vec<String> = config.key_attributes.iter().map(|c| quote_ident(c)).collect();
    if !current {
        order.push(quote_ident(COL_VALID_FROM));
    }
    format!(
        "SELECT {} FROM {} ORDER BY {}",
        select.join(", "),
        quote_qualified(table),
        order.join(", ")
    )
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => s.clone(),
    }
}

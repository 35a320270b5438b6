//! Scope predicates for the current-state relation
//!
//! A scope limits which current-state rows are considered for deletion when a
//! full batch is applied. Rows outside the scope are never read for that
//! purpose, which keeps large current-state tables from being scanned on
//! every run.

use crate::error::{CoreError, CoreResult};
use crate::sql_utils::{quote_ident, sql_literal};
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Unit of a logical period for [`ScopePredicate::Recent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PeriodUnit {
    Hour,
    #[default]
    Day,
    Week,
    Month,
}

impl PeriodUnit {
    fn as_sql(&self) -> &'static str {
        match self {
            PeriodUnit::Hour => "HOUR",
            PeriodUnit::Day => "DAY",
            PeriodUnit::Week => "WEEK",
            PeriodUnit::Month => "MONTH",
        }
    }
}

/// Filter over current-state columns
///
/// Deserialized from YAML such as:
///
/// ```yaml
/// scope:
///   recent: { column: last_changed_at, periods: 30, unit: day }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopePredicate {
    /// `column <op> value`
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    /// `column IN (values...)`
    In { column: String, values: Vec<Value> },
    /// `column IS NULL`
    IsNull { column: String },
    /// `column IS NOT NULL`
    NotNull { column: String },
    /// Timestamp column within the last N periods before the run timestamp
    Recent {
        column: String,
        periods: u32,
        #[serde(default)]
        unit: PeriodUnit,
    },
    /// Every nested predicate holds
    All(Vec<ScopePredicate>),
    /// At least one nested predicate holds
    Any(Vec<ScopePredicate>),
    /// Nested predicate does not hold
    Not(Box<ScopePredicate>),
}

impl ScopePredicate {
    /// Columns referenced anywhere in the predicate
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ScopePredicate::Compare { column, .. }
            | ScopePredicate::In { column, .. }
            | ScopePredicate::IsNull { column }
            | ScopePredicate::NotNull { column }
            | ScopePredicate::Recent { column, .. } => out.push(column),
            ScopePredicate::All(preds) | ScopePredicate::Any(preds) => {
                for p in preds {
                    p.collect_columns(out);
                }
            }
            ScopePredicate::Not(inner) => inner.collect_columns(out),
        }
    }

    /// Check structural validity and that only `allowed` columns are referenced.
    pub fn validate(&self, allowed: &[&str]) -> CoreResult<()> {
        for column in self.referenced_columns() {
            if !allowed.contains(&column) {
                return Err(CoreError::ConfigInvalid {
                    message: format!(
                        "scope references unknown column '{}' (allowed: {})",
                        column,
                        allowed.join(", ")
                    ),
                });
            }
        }
        self.validate_shape()
    }

    fn validate_shape(&self) -> CoreResult<()> {
        match self {
            ScopePredicate::In { column, values } if values.is_empty() => {
                Err(CoreError::ConfigInvalid {
                    message: format!("scope 'in' on '{}' has no values", column),
                })
            }
            ScopePredicate::Recent {
                column, periods: 0, ..
            } => Err(CoreError::ConfigInvalid {
                message: format!("scope 'recent' on '{}' needs periods >= 1", column),
            }),
            ScopePredicate::All(preds) | ScopePredicate::Any(preds) => {
                if preds.is_empty() {
                    return Err(CoreError::ConfigInvalid {
                        message: "scope 'all'/'any' needs at least one predicate".to_string(),
                    });
                }
                preds.iter().try_for_each(ScopePredicate::validate_shape)
            }
            ScopePredicate::Not(inner) => inner.validate_shape(),
            _ => Ok(()),
        }
    }

    /// Render as a SQL boolean expression.
    ///
    /// `reference` anchors [`ScopePredicate::Recent`] windows; callers pass the
    /// run timestamp so the window does not drift during a run.
    pub fn to_sql(&self, reference: DateTime<Utc>) -> String {
        match self {
            ScopePredicate::Compare { column, op, value } => {
                format!("{} {} {}", quote_ident(column), op.as_sql(), sql_literal(value))
            }
            ScopePredicate::In { column, values } => format!(
                "{} IN ({})",
                quote_ident(column),
                values.iter().map(sql_literal).collect::<Vec<_>>().join(", ")
            ),
            ScopePredicate::IsNull { column } => format!("{} IS NULL", quote_ident(column)),
            ScopePredicate::NotNull { column } => format!("{} IS NOT NULL", quote_ident(column)),
            ScopePredicate::Recent {
                column,
                periods,
                unit,
            } => format!(
                "{} >= TIMESTAMP '{}' - INTERVAL {} {}",
                quote_ident(column),
                reference.format("%Y-%m-%d %H:%M:%S%.6f"),
                periods,
                unit.as_sql()
            ),
            ScopePredicate::All(preds) => join_sql(preds, " AND ", reference),
            ScopePredicate::Any(preds) => join_sql(preds, " OR ", reference),
            ScopePredicate::Not(inner) => format!("NOT ({})", inner.to_sql(reference)),
        }
    }
}

fn join_sql(preds: &[ScopePredicate], sep: &str, reference: DateTime<Utc>) -> String {
    preds
        .iter()
        .map(|p| format!("({})", p.to_sql(reference)))
        .collect::<Vec<_>>()
        .join(sep)
}

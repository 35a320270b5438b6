//! SQL identifier quoting and literal rendering
//!
//! Table layouts and scope predicates are configuration-driven, so every
//! identifier and literal that reaches generated SQL goes through here.

use crate::value::Value;

/// Quote a SQL identifier to prevent injection.
///
/// Wraps the identifier in double quotes and escapes any embedded double quotes
/// by doubling them, following the SQL standard.
///
/// # Examples
/// ```
/// use hf_core::sql_utils::quote_ident;
/// assert_eq!(quote_ident("tags"), r#""tags""#);
/// assert_eq!(quote_ident(r#"my"table"#), r#""my""table""#);
/// ```
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a potentially schema-qualified name (e.g. `schema.table`).
///
/// # Examples
/// ```
/// use hf_core::sql_utils::quote_qualified;
/// assert_eq!(quote_qualified("tags"), r#""tags""#);
/// assert_eq!(quote_qualified("snapshots.snap_tags"), r#""snapshots"."snap_tags""#);
/// ```
pub fn quote_qualified(name: &str) -> String {
    name.split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

/// Split a potentially schema-qualified table name into (schema, table).
///
/// Uses the last `.` as the separator; unqualified names land in `main`.
///
/// # Examples
/// ```
/// use hf_core::sql_utils::split_qualified_name;
/// assert_eq!(split_qualified_name("tags"), ("main", "tags"));
/// assert_eq!(split_qualified_name("snapshots.snap_tags"), ("snapshots", "snap_tags"));
/// ```
pub fn split_qualified_name(name: &str) -> (&str, &str) {
    if let Some(pos) = name.rfind('.') {
        (&name[..pos], &name[pos + 1..])
    } else {
        ("main", name)
    }
}

/// Escape a SQL string literal value by doubling single quotes.
pub fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

/// Render a value as a SQL literal.
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => format!("{:?}", f),
        Value::Float(f) => format!("'{}'::DOUBLE", f),
        Value::String(s) => format!("'{}'", escape_sql_string(s)),
    }
}

//! Conversions between histflow values and DuckDB values

use crate::error::{DbError, DbResult};
use chrono::{DateTime, Utc};
use duckdb::types::{TimeUnit, Value as DuckValue, ValueRef};
use hf_core::{Row, Value};

/// Bindable parameter for a histflow value
pub(crate) fn to_param(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Bool(b) => DuckValue::Boolean(*b),
        Value::Int(i) => DuckValue::BigInt(*i),
        Value::Float(f) => DuckValue::Double(*f),
        Value::String(s) => DuckValue::Text(s.clone()),
    }
}

/// Bindable microsecond timestamp
pub(crate) fn ts_param(ts: DateTime<Utc>) -> DuckValue {
    DuckValue::BigInt(ts.timestamp_micros())
}

/// Timestamp from microseconds since the epoch
pub(crate) fn from_micros(micros: i64) -> DbResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| DbError::Internal(format!("timestamp out of range: {micros}us")))
}

/// Read a column as a histflow value.
///
/// Integer widths collapse to `Int`, floating types to `Float`. Types with no
/// histflow counterpart fall back to their string form, or null.
pub(crate) fn read_value(row: &duckdb::Row<'_>, idx: usize) -> Value {
    match row.get_ref(idx) {
        Ok(ValueRef::Null) => Value::Null,
        Ok(ValueRef::Boolean(b)) => Value::Bool(b),
        Ok(ValueRef::TinyInt(i)) => Value::Int(i64::from(i)),
        Ok(ValueRef::SmallInt(i)) => Value::Int(i64::from(i)),
        Ok(ValueRef::Int(i)) => Value::Int(i64::from(i)),
        Ok(ValueRef::BigInt(i)) => Value::Int(i),
        Ok(ValueRef::UTinyInt(i)) => Value::Int(i64::from(i)),
        Ok(ValueRef::USmallInt(i)) => Value::Int(i64::from(i)),
        Ok(ValueRef::UInt(i)) => Value::Int(i64::from(i)),
        Ok(ValueRef::Float(f)) => Value::Float(f64::from(f)),
        Ok(ValueRef::Double(f)) => Value::Float(f),
        Ok(ValueRef::UBigInt(i)) => {
            i64::try_from(i).map_or_else(|_| Value::String(i.to_string()), Value::Int)
        }
        Ok(ValueRef::HugeInt(i)) => {
            i64::try_from(i).map_or_else(|_| Value::String(i.to_string()), Value::Int)
        }
        Ok(ValueRef::Text(bytes)) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        Ok(ValueRef::Date32(days)) => days
            .checked_add(UNIX_EPOCH_DAYS_FROM_CE)
            .and_then(chrono::NaiveDate::from_num_days_from_ce_opt)
            .map_or(Value::Null, |d| Value::String(d.format("%Y-%m-%d").to_string())),
        Ok(ValueRef::Timestamp(unit, raw)) => {
            DateTime::from_timestamp_micros(unit_to_micros(unit, raw)).map_or(Value::Null, |ts| {
                Value::String(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string())
            })
        }
        _ => {
            if let Ok(Some(s)) = row.get::<_, Option<String>>(idx) {
                Value::String(s)
            } else if let Ok(Some(n)) = row.get::<_, Option<i64>>(idx) {
                Value::Int(n)
            } else if let Ok(Some(f)) = row.get::<_, Option<f64>>(idx) {
                Value::Float(f)
            } else {
                Value::Null
            }
        }
    }
}

/// Days from 0001-01-01 to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

fn unit_to_micros(unit: TimeUnit, raw: i64) -> i64 {
    match unit {
        TimeUnit::Second => raw.saturating_mul(1_000_000),
        TimeUnit::Millisecond => raw.saturating_mul(1_000),
        TimeUnit::Microsecond => raw,
        TimeUnit::Nanosecond => raw / 1_000,
    }
}

/// Execute a prepared statement and collect every row as a [`Row`].
///
/// DuckDB panics on `stmt.column_count()` before execution, so rows are
/// collected first and column metadata read afterwards.
pub(crate) fn collect_rows(stmt: &mut duckdb::Statement<'_>) -> DbResult<Vec<Row>> {
    let raw_rows: Vec<Vec<Value>> = stmt
        .query_map([], |row| {
            let col_count = row.as_ref().column_count();
            Ok((0..col_count).map(|i| read_value(row, i)).collect())
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let column_count = stmt.column_count();
    let column_names: Vec<String> = (0..column_count)
        .map(|i| {
            stmt.column_name(i)
                .map_or_else(|_| format!("column{i}"), |v| v.to_string())
        })
        .collect();

    Ok(raw_rows
        .into_iter()
        .map(|values| column_names.iter().cloned().zip(values).collect())
        .collect())
}

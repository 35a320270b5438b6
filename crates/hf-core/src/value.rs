//! Typed scalar values carried by snapshot rows
//!
//! Rows arrive from JSON files, CSV extracts, or warehouse relations. Every
//! cell is reduced to one of five scalar shapes so that hashing and storage
//! behave the same regardless of where the batch came from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sentinel written in place of a null when building hash input.
///
/// Real values are escaped before hashing, so a lone backslash followed by
/// `N` can never be produced by one of them.
pub const NULL_SENTINEL: &str = "\\N";

/// Separator between values in hash input.
pub const VALUE_SEPARATOR: char = '|';

/// A single typed scalar cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL / JSON null
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Text
    String(String),
}

/// A row: column name to value, ordered by column name
pub type Row = BTreeMap<String, Value>;

impl Value {
    /// Whether this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Append the canonical hash encoding of this value to `out`.
    ///
    /// Strings have `\` and the value separator escaped; numbers and booleans
    /// use their canonical text; null becomes [`NULL_SENTINEL`].
    pub fn write_canonical(&self, out: &mut String) {
        match self {
            Value::Null => out.push_str(NULL_SENTINEL),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&canonical_float(*f)),
            Value::String(s) => {
                for ch in s.chars() {
                    if ch == '\\' || ch == VALUE_SEPARATOR {
                        out.push('\\');
                    }
                    out.push(ch);
                }
            }
        }
    }

    /// The SQL type a column should get when this is its first non-null value
    pub fn inferred_sql_type(&self) -> Option<SqlType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(SqlType::Boolean),
            Value::Int(_) => Some(SqlType::Bigint),
            Value::Float(_) => Some(SqlType::Double),
            Value::String(_) => Some(SqlType::Varchar),
        }
    }
}

/// Largest magnitude below which every integer is exact in an f64
const MAX_EXACT_INT: u64 = 1 << 53;

/// The integer an integral float stands for, when that is exact
fn exact_int(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && f.abs() < MAX_EXACT_INT as f64).then(|| f as i64)
}

/// Canonical text for a float: integral values print as integers (so `4.0`
/// and `4` agree, and `-0.0` folds into `0`), everything else uses the
/// shortest round-trip form.
fn canonical_float(f: f64) -> String {
    match exact_int(f) {
        Some(i) => i.to_string(),
        None => format!("{:?}", f),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", canonical_float(*x)),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Column storage type for tracked and key attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SqlType {
    /// Text (also the fallback when nothing better is known)
    #[default]
    Varchar,
    /// 64-bit integer
    Bigint,
    /// Double precision float
    Double,
    /// Boolean
    Boolean,
}

impl SqlType {
    /// DDL spelling of the type
    pub fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Varchar => "VARCHAR",
            SqlType::Bigint => "BIGINT",
            SqlType::Double => "DOUBLE",
            SqlType::Boolean => "BOOLEAN",
        }
    }
}

impl SqlType {
    /// Parse a column type as reported by the store
    pub fn from_sql(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "VARCHAR" | "TEXT" | "STRING" => Some(SqlType::Varchar),
            "BIGINT" | "INT8" | "LONG" => Some(SqlType::Bigint),
            "DOUBLE" | "FLOAT8" => Some(SqlType::Double),
            "BOOLEAN" | "BOOL" => Some(SqlType::Boolean),
            _ => None,
        }
    }

    /// The narrowest type that holds values of both `self` and `other`
    pub fn widen(self, other: SqlType) -> SqlType {
        match (self, other) {
            (a, b) if a == b => a,
            (SqlType::Bigint, SqlType::Double) | (SqlType::Double, SqlType::Bigint) => {
                SqlType::Double
            }
            _ => SqlType::Varchar,
        }
    }

    /// Whether a column of this type stores `value` with its canonical text
    /// unchanged, so the stored payload still matches the fingerprint.
    pub fn holds(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (SqlType::Varchar, _) => true,
            (SqlType::Bigint, Value::Int(_)) => true,
            (SqlType::Bigint, Value::Float(f)) => exact_int(*f).is_some(),
            (SqlType::Bigint, Value::String(s)) => {
                s.parse::<i64>().is_ok_and(|i| i.to_string() == *s)
            }
            (SqlType::Double, Value::Float(_)) => true,
            (SqlType::Double, Value::Int(i)) => i.unsigned_abs() < MAX_EXACT_INT,
            (SqlType::Double, Value::String(s)) => s
                .parse::<f64>()
                .is_ok_and(|f| f.is_finite() && canonical_float(f) == *s),
            (SqlType::Boolean, Value::Bool(_)) => true,
            (SqlType::Boolean, Value::String(s)) => s == "true" || s == "false",
            _ => false,
        }
    }

    /// The value to bind when writing `value` into a column of this type.
    ///
    /// Text columns receive the canonical text so the store never formats
    /// numbers on its own.
    pub fn storage_value(&self, value: &Value) -> Value {
        match (self, value) {
            (SqlType::Varchar, Value::Bool(_) | Value::Int(_) | Value::Float(_)) => {
                Value::String(value.to_string())
            }
            (SqlType::Bigint, Value::Float(f)) => {
                exact_int(*f).map_or_else(|| value.clone(), Value::Int)
            }
            (SqlType::Double, Value::Int(i)) => Value::Float(*i as f64),
            _ => value.clone(),
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

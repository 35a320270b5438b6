//! Column layout shared by the historical and current-state relations

use crate::value::{Row, SqlType, Value};
use std::collections::BTreeMap;

/// Surrogate key column (both relations)
pub const COL_SURROGATE_KEY: &str = "surrogate_key";
/// Content fingerprint column (both relations)
pub const COL_FINGERPRINT: &str = "fingerprint";
/// Historical version identifier
pub const COL_SCD_ID: &str = "scd_id";
/// Inclusive start of a version's validity
pub const COL_VALID_FROM: &str = "valid_from";
/// Exclusive end of a version's validity; null while current
pub const COL_VALID_TO: &str = "valid_to";
/// Whether a historical version is the current one
pub const COL_IS_CURRENT: &str = "is_current";
/// History: version closed by a deletion. Current state: tombstone.
pub const COL_IS_DELETED: &str = "is_deleted";
/// Current state: run timestamp of the last write to the row
pub const COL_LAST_CHANGED_AT: &str = "last_changed_at";

/// Metadata column names that user attributes may not use
pub const RESERVED_COLUMNS: &[&str] = &[
    COL_SURROGATE_KEY,
    COL_FINGERPRINT,
    COL_SCD_ID,
    COL_VALID_FROM,
    COL_VALID_TO,
    COL_IS_CURRENT,
    COL_IS_DELETED,
    COL_LAST_CHANGED_AT,
];

/// A user attribute column and its storage type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Storage type
    pub sql_type: SqlType,
}

/// The user attribute columns stored in both relations, in storage order:
/// key attributes first, then tracked attributes not already listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    /// Attribute columns
    pub columns: Vec<ColumnDef>,
}

impl TableLayout {
    /// Resolve the layout for a set of attributes.
    ///
    /// Types come from `declared` when present, otherwise from every non-null
    /// value in `rows` (see [`infer_type`]), otherwise VARCHAR.
    pub fn resolve(
        key_attributes: &[String],
        tracked_attributes: &[String],
        declared: &BTreeMap<String, SqlType>,
        rows: &[Row],
    ) -> Self {
        let mut columns: Vec<ColumnDef> = Vec::new();
        for name in key_attributes.iter().chain(tracked_attributes) {
            if columns.iter().any(|c| &c.name == name) {
                continue;
            }
            let sql_type = declared
                .get(name)
                .copied()
                .unwrap_or_else(|| infer_type(rows.iter().filter_map(|row| row.get(name))));
            columns.push(ColumnDef {
                name: name.clone(),
                sql_type,
            });
        }
        Self { columns }
    }

    /// This layout with column types replaced by those of an existing relation.
    ///
    /// `stored` maps column names to the store's type names; columns it does
    /// not list, or whose type has no [`SqlType`] counterpart, keep theirs.
    pub fn with_stored_types(&self, stored: &BTreeMap<String, String>) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|c| ColumnDef {
                name: c.name.clone(),
                sql_type: stored
                    .get(&c.name)
                    .and_then(|t| SqlType::from_sql(t))
                    .unwrap_or(c.sql_type),
            })
            .collect();
        Self { columns }
    }

    /// The first column of `row` whose type cannot hold the row's value
    pub fn first_unfit<'a>(&'a self, row: &'a Row) -> Option<(&'a ColumnDef, &'a Value)> {
        self.columns.iter().find_map(|c| {
            row.get(&c.name)
                .filter(|v| !c.sql_type.holds(v))
                .map(|v| (c, v))
        })
    }

    /// Attribute column names in storage order
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Values of `row` in storage order, converted for their column type;
    /// absent attributes become null
    pub fn values_for(&self, row: &Row) -> Vec<Value> {
        self.columns
            .iter()
            .map(|c| {
                row.get(&c.name)
                    .map_or(Value::Null, |v| c.sql_type.storage_value(v))
            })
            .collect()
    }
}

/// Column type for a set of values, independent of their order.
///
/// One type is kept as is, BIGINT with DOUBLE widens to DOUBLE, and any
/// other mix widens to VARCHAR. If the widened type cannot hold every value
/// exactly the column falls back to VARCHAR.
pub fn infer_type<'a>(values: impl Iterator<Item = &'a Value>) -> SqlType {
    let values: Vec<&Value> = values.filter(|v| !v.is_null()).collect();
    let widened = values
        .iter()
        .filter_map(|v| v.inferred_sql_type())
        .reduce(SqlType::widen)
        .unwrap_or_default();
    if values.iter().all(|v| widened.holds(v)) {
        widened
    } else {
        SqlType::Varchar
    }
}

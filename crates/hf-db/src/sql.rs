//! SQL text for the two maintained relations

use hf_core::layout::{
    COL_FINGERPRINT, COL_IS_CURRENT, COL_IS_DELETED, COL_LAST_CHANGED_AT, COL_SCD_ID,
    COL_SURROGATE_KEY, COL_VALID_FROM, COL_VALID_TO,
};
use hf_core::sql_utils::{quote_ident, quote_qualified};
use hf_core::TableLayout;

/// Temp table holding keys a statement is restricted to
pub(crate) const KEYS_TABLE: &str = "hf_keys";

/// Timestamp parameter: bound as microseconds since the epoch
const TS_PARAM: &str = "make_timestamp(CAST(? AS BIGINT))";

fn attribute_column_defs(layout: &TableLayout) -> Vec<String> {
    layout
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.sql_type.as_sql()))
        .collect()
}

fn attribute_columns(layout: &TableLayout) -> Vec<String> {
    layout.column_names().map(quote_ident).collect()
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// CREATE TABLE for the historical relation
pub(crate) fn create_history_table(table: &str, layout: &TableLayout) -> String {
    let mut cols = vec![
        format!("{} VARCHAR NOT NULL", quote_ident(COL_SCD_ID)),
        format!("{} VARCHAR NOT NULL", quote_ident(COL_SURROGATE_KEY)),
    ];
    cols.extend(attribute_column_defs(layout));
    cols.extend([
        format!("{} VARCHAR NOT NULL", quote_ident(COL_FINGERPRINT)),
        format!("{} TIMESTAMP NOT NULL", quote_ident(COL_VALID_FROM)),
        format!("{} TIMESTAMP", quote_ident(COL_VALID_TO)),
        format!("{} BOOLEAN NOT NULL", quote_ident(COL_IS_CURRENT)),
        format!(
            "{} BOOLEAN NOT NULL DEFAULT false",
            quote_ident(COL_IS_DELETED)
        ),
    ]);
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_qualified(table),
        cols.join(", ")
    )
}

/// CREATE TABLE for the current-state relation
pub(crate) fn create_current_table(table: &str, layout: &TableLayout) -> String {
    let mut cols = vec![format!("{} VARCHAR NOT NULL", quote_ident(COL_SURROGATE_KEY))];
    cols.extend(attribute_column_defs(layout));
    cols.extend([
        format!("{} VARCHAR NOT NULL", quote_ident(COL_FINGERPRINT)),
        format!("{} TIMESTAMP NOT NULL", quote_ident(COL_LAST_CHANGED_AT)),
        format!(
            "{} BOOLEAN NOT NULL DEFAULT false",
            quote_ident(COL_IS_DELETED)
        ),
    ]);
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_qualified(table),
        cols.join(", ")
    )
}

/// ALTER TABLE statements adding layout columns missing from `existing`
pub(crate) fn add_missing_columns(
    table: &str,
    layout: &TableLayout,
    existing: &[String],
) -> Vec<(String, String)> {
    layout
        .columns
        .iter()
        .filter(|c| !existing.iter().any(|e| e.eq_ignore_ascii_case(&c.name)))
        .map(|c| {
            (
                c.name.clone(),
                format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    quote_qualified(table),
                    quote_ident(&c.name),
                    c.sql_type.as_sql()
                ),
            )
        })
        .collect()
}

/// Current historical versions, optionally restricted to staged keys
pub(crate) fn select_current_versions(table: &str, restrict_to_keys: bool) -> String {
    let mut sql = format!(
        "SELECT {sk}, {fp}, epoch_us({vf}) FROM {t} WHERE {cur}",
        sk = quote_ident(COL_SURROGATE_KEY),
        fp = quote_ident(COL_FINGERPRINT),
        vf = quote_ident(COL_VALID_FROM),
        t = quote_qualified(table),
        cur = quote_ident(COL_IS_CURRENT),
    );
    if restrict_to_keys {
        sql.push_str(&format!(
            " AND {} IN (SELECT surrogate_key FROM {})",
            quote_ident(COL_SURROGATE_KEY),
            KEYS_TABLE
        ));
    }
    sql.push_str(&format!(" ORDER BY {}", quote_ident(COL_SURROGATE_KEY)));
    sql
}

/// Close the current version of one key. Parameters: valid_to, is_deleted, surrogate_key.
pub(crate) fn close_history_version(table: &str) -> String {
    format!(
        "UPDATE {t} SET {vt} = {TS_PARAM}, {cur} = false, {del} = ? WHERE {sk} = ? AND {cur}",
        t = quote_qualified(table),
        vt = quote_ident(COL_VALID_TO),
        cur = quote_ident(COL_IS_CURRENT),
        del = quote_ident(COL_IS_DELETED),
        sk = quote_ident(COL_SURROGATE_KEY),
    )
}

/// Open a version. Parameters: scd_id, surrogate_key, attributes..., fingerprint, valid_from.
pub(crate) fn insert_history_version(table: &str, layout: &TableLayout) -> String {
    let mut cols = vec![quote_ident(COL_SCD_ID), quote_ident(COL_SURROGATE_KEY)];
    cols.extend(attribute_columns(layout));
    cols.extend([
        quote_ident(COL_FINGERPRINT),
        quote_ident(COL_VALID_FROM),
        quote_ident(COL_VALID_TO),
        quote_ident(COL_IS_CURRENT),
        quote_ident(COL_IS_DELETED),
    ]);
    format!(
        "INSERT INTO {} ({}) VALUES ({}, {}, NULL, true, false)",
        quote_qualified(table),
        cols.join(", "),
        placeholders(2 + layout.columns.len() + 1),
        TS_PARAM
    )
}

/// Breach detection over the historical relation.
///
/// Result columns: surrogate_key, breach kind name.
pub(crate) fn detect_breaches(table: &str, restrict_to_keys: bool) -> String {
    let filter = if restrict_to_keys {
        format!(
            " WHERE {} IN (SELECT surrogate_key FROM {})",
            quote_ident(COL_SURROGATE_KEY),
            KEYS_TABLE
        )
    } else {
        String::new()
    };
    format!(
        r#"WITH scoped AS (
    SELECT {sk} AS sk, {vf} AS vf, {vt} AS vt, {cur} AS cur, {del} AS del
    FROM {t}{filter}
),
ordered AS (
    SELECT sk, vf,
        LAG(vf) OVER w AS prev_vf,
        LAG(vt) OVER w AS prev_vt,
        LAG(del) OVER w AS prev_del
    FROM scoped
    WINDOW w AS (PARTITION BY sk ORDER BY vf, vt NULLS LAST)
)
SELECT DISTINCT sk, kind FROM (
    SELECT sk, 'multiple_current' AS kind FROM scoped WHERE cur GROUP BY sk HAVING COUNT(*) > 1
    UNION ALL
    SELECT sk, 'current_flag_mismatch' FROM scoped WHERE cur <> (vt IS NULL)
    UNION ALL
    SELECT sk, 'empty_interval' FROM scoped WHERE vt IS NOT NULL AND vt <= vf
    UNION ALL
    SELECT sk, 'overlap' FROM ordered
        WHERE prev_vf IS NOT NULL AND (prev_vt IS NULL OR prev_vt > vf)
    UNION ALL
    SELECT sk, 'gap' FROM ordered
        WHERE prev_vf IS NOT NULL AND prev_vt < vf AND NOT prev_del
) breaches
ORDER BY sk, kind"#,
        sk = quote_ident(COL_SURROGATE_KEY),
        vf = quote_ident(COL_VALID_FROM),
        vt = quote_ident(COL_VALID_TO),
        cur = quote_ident(COL_IS_CURRENT),
        del = quote_ident(COL_IS_DELETED),
        t = quote_qualified(table),
    )
}

/// Current-state index rows: probe keys plus, optionally, live rows in scope
pub(crate) fn select_current_index(
    table: &str,
    include_live: bool,
    scope_sql: Option<&str>,
) -> String {
    let in_scope = match scope_sql {
        Some(scope) => format!("COALESCE(({}), false)", scope),
        None => "true".to_string(),
    };
    let live = if include_live {
        format!(" OR (NOT {} AND {})", quote_ident(COL_IS_DELETED), in_scope)
    } else {
        String::new()
    };
    format!(
        "SELECT {sk}, {fp}, {del}, {in_scope} AS in_scope FROM {t} \
         WHERE {sk} IN (SELECT surrogate_key FROM {keys}){live} ORDER BY {sk}",
        sk = quote_ident(COL_SURROGATE_KEY),
        fp = quote_ident(COL_FINGERPRINT),
        del = quote_ident(COL_IS_DELETED),
        t = quote_qualified(table),
        keys = KEYS_TABLE,
    )
}

/// Overwrite one current-state row. Parameters: attributes..., fingerprint, last_changed_at, surrogate_key.
pub(crate) fn update_current_row(table: &str, layout: &TableLayout) -> String {
    let mut sets: Vec<String> = attribute_columns(layout)
        .into_iter()
        .map(|c| format!("{} = ?", c))
        .collect();
    sets.extend([
        format!("{} = ?", quote_ident(COL_FINGERPRINT)),
        format!("{} = {}", quote_ident(COL_LAST_CHANGED_AT), TS_PARAM),
        format!("{} = false", quote_ident(COL_IS_DELETED)),
    ]);
    format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quote_qualified(table),
        sets.join(", "),
        quote_ident(COL_SURROGATE_KEY)
    )
}

/// Insert one current-state row. Parameters: surrogate_key, attributes..., fingerprint, last_changed_at.
pub(crate) fn insert_current_row(table: &str, layout: &TableLayout) -> String {
    let mut cols = vec![quote_ident(COL_SURROGATE_KEY)];
    cols.extend(attribute_columns(layout));
    cols.extend([
        quote_ident(COL_FINGERPRINT),
        quote_ident(COL_LAST_CHANGED_AT),
        quote_ident(COL_IS_DELETED),
    ]);
    format!(
        "INSERT INTO {} ({}) VALUES ({}, {}, false)",
        quote_qualified(table),
        cols.join(", "),
        placeholders(1 + layout.columns.len() + 1),
        TS_PARAM
    )
}

/// Remove one current-state row. Parameters: surrogate_key.
pub(crate) fn delete_current_row(table: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?",
        quote_qualified(table),
        quote_ident(COL_SURROGATE_KEY)
    )
}

/// Tombstone one current-state row. Parameters: last_changed_at, surrogate_key.
pub(crate) fn tombstone_current_row(table: &str) -> String {
    format!(
        "UPDATE {t} SET {del} = true, {lc} = {TS_PARAM} WHERE {sk} = ? AND NOT {del}",
        t = quote_qualified(table),
        del = quote_ident(COL_IS_DELETED),
        lc = quote_ident(COL_LAST_CHANGED_AT),
        sk = quote_ident(COL_SURROGATE_KEY),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hf_core::{ColumnDef, SqlType};

    fn layout() -> TableLayout {
        TableLayout {
            columns: vec![
                ColumnDef {
                    name: "tag_id".to_string(),
                    sql_type: SqlType::Bigint,
                },
                ColumnDef {
                    name: "tag".to_string(),
                    sql_type: SqlType::Varchar,
                },
            ],
        }
    }

    #[test]
    fn test_create_history_table_column_order() {
        let sql = create_history_table("snapshots.snap_tags", &layout());
        assert!(sql.starts_with(r#"CREATE TABLE IF NOT EXISTS "snapshots"."snap_tags" ("scd_id""#));
        let tag_id = sql.find(r#""tag_id" BIGINT"#).unwrap();
        let fp = sql.find(r#""fingerprint""#).unwrap();
        assert!(tag_id < fp);
        assert!(sql.contains(r#""valid_to" TIMESTAMP,"#));
    }

    #[test]
    fn test_insert_placeholders_match_parameters() {
        let sql = insert_history_version("h", &layout());
        // scd_id, surrogate_key, 2 attributes, fingerprint, valid_from
        assert_eq!(sql.matches('?').count(), 6);

        let sql = update_current_row("c", &layout());
        // 2 attributes, fingerprint, last_changed_at, surrogate_key
        assert_eq!(sql.matches('?').count(), 5);

        let sql = insert_current_row("c", &layout());
        assert_eq!(sql.matches('?').count(), 5);
    }

    #[test]
    fn test_add_missing_columns() {
        let stmts = add_missing_columns("h", &layout(), &["TAG_ID".to_string()]);
        assert_eq!(stmts.len(), 1);
        assert_eq!(stmts[0].0, "tag");
        assert_eq!(stmts[0].1, r#"ALTER TABLE "h" ADD COLUMN "tag" VARCHAR"#);
    }

    #[test]
    fn test_current_index_scope() {
        let sql = select_current_index("c", true, Some(r#""tag" = 'x'"#));
        assert!(sql.contains(r#"COALESCE(("tag" = 'x'), false) AS in_scope"#));
        assert!(sql.contains(r#"OR (NOT "is_deleted" AND COALESCE"#));

        let sql = select_current_index("c", false, None);
        assert!(sql.contains("true AS in_scope"));
        assert!(!sql.contains(" OR "));
    }
}

// ABOUTME: Pure diff planning between source and destination row sets
// ABOUTME: Builds the SELECT/INSERT/UPDATE/DELETE statements used to reconcile a table

use std::collections::{HashMap, HashSet};

use crate::db::{Row, RowKey, RowShape, SqlValue};
use crate::utils::quote_ident;

/// SQL Server rejects requests with more than 2,100 parameters.
pub const MAX_PARAMETERS: usize = 2_100;
/// SQL Server rejects table value constructors with more than 1,000 rows.
pub const MAX_VALUES_ROWS: usize = 1_000;

/// `SELECT <shape> FROM <table> [WHERE <filter>]`
pub fn select_query(table: &str, shape: &RowShape, filter: Option<&str>) -> String {
    let mut sql = format!("SELECT {} FROM {}", shape.select_list(), table);
    if let Some(filter) = filter {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }
    sql
}

/// `SELECT MAX([rv]) FROM <table>`
pub fn max_rowversion_query(table: &str, column: &str) -> String {
    format!("SELECT MAX({}) FROM {}", quote_ident(column), table)
}

/// Collect the key tuple of every row.
pub fn key_set(rows: &[Row], key_positions: &[usize]) -> HashSet<RowKey> {
    rows.iter()
        .map(|row| RowKey::from_row(row, key_positions))
        .collect()
}

/// Source rows whose key is absent from the destination, projected onto `value_positions`.
pub fn plan_inserts(
    source_rows: &[Row],
    dest_keys: &HashSet<RowKey>,
    key_positions: &[usize],
    value_positions: &[usize],
) -> Vec<Vec<SqlValue>> {
    source_rows
        .iter()
        .filter(|row| !dest_keys.contains(&RowKey::from_row(row, key_positions)))
        .map(|row| row.project(value_positions))
        .collect()
}

/// Source rows that exist on both sides but differ in any compared column.
///
/// Each result is the parameter list for [`update_statement`]: the compared
/// values first, then the key values.
pub fn plan_updates(
    source_rows: &[Row],
    dest_rows: &[Row],
    key_positions: &[usize],
    compare_positions: &[usize],
) -> Vec<Vec<SqlValue>> {
    if compare_positions.is_empty() {
        return Vec::new();
    }

    let dest_by_key: HashMap<RowKey, &Row> = dest_rows
        .iter()
        .map(|row| (RowKey::from_row(row, key_positions), row))
        .collect();

    let mut updates = Vec::new();
    for row in source_rows {
        let key = RowKey::from_row(row, key_positions);
        let Some(dest) = dest_by_key.get(&key) else {
            continue;
        };
        let changed = compare_positions
            .iter()
            .any(|&i| row.values()[i] != dest.values()[i]);
        if changed {
            let mut params = row.project(compare_positions);
            params.extend(key.into_values());
            updates.push(params);
        }
    }
    updates
}

/// Destination keys absent from the source, in destination order.
pub fn plan_deletes(
    source_keys: &HashSet<RowKey>,
    dest_rows: &[Row],
    key_positions: &[usize],
) -> Vec<Vec<SqlValue>> {
    dest_rows
        .iter()
        .map(|row| RowKey::from_row(row, key_positions))
        .filter(|key| !source_keys.contains(key))
        .map(RowKey::into_values)
        .collect()
}

/// Rows per multi-row `INSERT … VALUES` statement for `column_count` columns.
pub fn insert_chunk_rows(column_count: usize) -> usize {
    if column_count == 0 {
        return MAX_VALUES_ROWS;
    }
    ((MAX_PARAMETERS - 1) / column_count).clamp(1, MAX_VALUES_ROWS)
}

/// `INSERT INTO t ([a], [b]) VALUES (@P1, @P2), (@P3, @P4), …` for `row_count` rows.
pub fn insert_statement(table: &str, columns: &[String], row_count: usize) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let mut n = 0;
    let tuples = (0..row_count)
        .map(|_| {
            let placeholders = columns
                .iter()
                .map(|_| {
                    n += 1;
                    format!("@P{}", n)
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", placeholders)
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!("INSERT INTO {} ({}) VALUES {}", table, column_list, tuples)
}

/// `UPDATE t SET [c1] = @P1, … WHERE [k1] = @Pn AND …`
pub fn update_statement(table: &str, set_columns: &[String], key_columns: &[String]) -> String {
    let set_clause = set_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = @P{}", quote_ident(c), i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {} WHERE {}",
        table,
        set_clause,
        key_predicate(key_columns, set_columns.len() + 1)
    )
}

/// `DELETE FROM t WHERE [k1] = @P1 AND …`
pub fn delete_statement(table: &str, key_columns: &[String]) -> String {
    format!("DELETE FROM {} WHERE {}", table, key_predicate(key_columns, 1))
}

fn key_predicate(key_columns: &[String], first_param: usize) -> String {
    key_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = @P{}", quote_ident(c), first_param + i))
        .collect::<Vec<_>>()
        .join(" AND ")
}

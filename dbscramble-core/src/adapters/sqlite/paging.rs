//! SQLite schema probe and page reads.

use crate::adapters::helpers::{order_by_clause, quote_identifier};
use crate::error::ScrambleError;
use crate::models::{CellValue, OrderKey, Page, Row};
use sqlx::{Row as _, SqlitePool};

/// Ordered column names via `PRAGMA table_info`.
///
/// # Errors
/// Returns `MissingTable` when the pragma reports no columns
pub async fn table_columns(pool: &SqlitePool, table: &str) -> Result<Vec<String>, ScrambleError> {
    let pragma = format!("PRAGMA table_info('{}')", table.replace('\'', "''"));

    let rows = sqlx::query(&pragma).fetch_all(pool).await.map_err(|e| {
        ScrambleError::query_failed(format!("Failed to probe columns of table '{}'", table), e)
    })?;

    let mut columns: Vec<(i64, String)> = rows
        .iter()
        .map(|row| {
            let cid: i64 = row.try_get("cid").unwrap_or_default();
            let name: String = row.try_get("name").unwrap_or_default();
            (cid, name)
        })
        .collect();

    if columns.is_empty() {
        return Err(ScrambleError::missing_table(table));
    }

    columns.sort_by_key(|(cid, _)| *cid);
    Ok(columns.into_iter().map(|(_, name)| name).collect())
}

/// `SELECT` for one page of selected columns.
pub fn page_query(table: &str, order_key: &OrderKey, columns: &[String]) -> String {
    let select: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();
    format!(
        "SELECT {} FROM {} {} LIMIT ? OFFSET ?",
        select.join(", "),
        quote_identifier(table),
        order_by_clause(order_key)
    )
}

/// Reads one page of a table.
pub async fn read_page(
    pool: &SqlitePool,
    table: &str,
    order_key: &OrderKey,
    columns: &[String],
    page_size: u64,
    offset: u64,
) -> Result<Page, ScrambleError> {
    let limit = i64::try_from(page_size)
        .map_err(|_| ScrambleError::configuration("page_size does not fit in a SQLite integer"))?;
    let offset_value = i64::try_from(offset)
        .map_err(|_| ScrambleError::configuration("offset does not fit in a SQLite integer"))?;

    let query = page_query(table, order_key, columns);
    let rows = sqlx::query(&query)
        .bind(limit)
        .bind(offset_value)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            ScrambleError::query_failed(
                format!("Failed to read page at offset {} of table '{}'", offset, table),
                e,
            )
        })?;

    let rows = rows
        .iter()
        .map(|row| Row::new((0..columns.len()).map(|i| extract_cell(row, i)).collect()))
        .collect();

    Ok(Page::new(columns.to_vec(), rows))
}

/// Extracts a cell keeping its storage class.
fn extract_cell(row: &sqlx::sqlite::SqliteRow, index: usize) -> CellValue {
    // SQLite is dynamically typed, so we need to try multiple types
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map(CellValue::Text).unwrap_or(CellValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map(CellValue::Integer).unwrap_or(CellValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v.map(CellValue::Real).unwrap_or(CellValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return v.map(CellValue::Blob).unwrap_or(CellValue::Null);
    }

    CellValue::Null
}

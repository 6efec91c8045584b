//! PostgreSQL schema probe and page reads.

use crate::adapters::helpers::{order_by_clause, qualified_table, quote_identifier};
use crate::error::ScrambleError;
use crate::models::{CellValue, OrderKey, Page, Row};
use sqlx::{PgPool, Row as _};

/// A column and its declared type as `format_type` renders it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    pub name: String,
    pub data_type: String,
}

const COLUMNS_QUERY: &str = "\
    SELECT a.attname::text AS name, format_type(a.atttypid, a.atttypmod) AS data_type \
    FROM pg_attribute a \
    JOIN pg_class c ON c.oid = a.attrelid \
    JOIN pg_namespace n ON n.oid = c.relnamespace \
    WHERE n.nspname = $1 AND c.relname = $2 AND a.attnum > 0 AND NOT a.attisdropped \
    ORDER BY a.attnum";

/// Ordered columns of a table with their declared types.
///
/// # Errors
/// Returns `MissingTable` when the table has no visible columns
pub async fn table_columns(
    pool: &PgPool,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnType>, ScrambleError> {
    let rows = sqlx::query(COLUMNS_QUERY)
        .bind(schema)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            ScrambleError::query_failed(format!("Failed to probe columns of table '{}'", table), e)
        })?;

    let columns = rows
        .iter()
        .map(|row| {
            Ok(ColumnType {
                name: row.try_get("name")?,
                data_type: row.try_get("data_type")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(|e| {
            ScrambleError::query_failed(format!("Failed to decode columns of table '{}'", table), e)
        })?;

    if columns.is_empty() {
        return Err(ScrambleError::missing_table(table));
    }

    Ok(columns)
}

/// `SELECT` for one page, every column cast to text.
pub fn page_query(schema: &str, table: &str, order_key: &OrderKey, columns: &[String]) -> String {
    let select: Vec<String> = columns
        .iter()
        .map(|c| format!("{}::text", quote_identifier(c)))
        .collect();
    format!(
        "SELECT {} FROM {} {} LIMIT $1 OFFSET $2",
        select.join(", "),
        qualified_table(Some(schema), table),
        order_by_clause(order_key)
    )
}

/// Reads one page of a table as text cells.
pub async fn read_page(
    pool: &PgPool,
    schema: &str,
    table: &str,
    order_key: &OrderKey,
    columns: &[String],
    page_size: u64,
    offset: u64,
) -> Result<Page, ScrambleError> {
    let limit = i64::try_from(page_size)
        .map_err(|_| ScrambleError::configuration("page_size does not fit in a bigint"))?;
    let offset_value = i64::try_from(offset)
        .map_err(|_| ScrambleError::configuration("offset does not fit in a bigint"))?;

    let query = page_query(schema, table, order_key, columns);
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
        .map(|row| {
            let values = (0..columns.len())
                .map(|i| row.try_get::<Option<String>, _>(i).map(CellValue::from))
                .collect::<Result<Vec<_>, sqlx::Error>>()?;
            Ok(Row::new(values))
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(|e| {
            ScrambleError::query_failed(format!("Failed to decode page of table '{}'", table), e)
        })?;

    Ok(Page::new(columns.to_vec(), rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_query_casts_to_text() {
        let query = page_query(
            "public",
            "cor_users",
            &OrderKey::primary("id"),
            &["id".to_string(), "email".to_string()],
        );
        assert_eq!(
            query,
            "SELECT \"id\"::text, \"email\"::text FROM \"public\".\"cor_users\" ORDER BY \"id\" ASC LIMIT $1 OFFSET $2"
        );
    }
}

//! Helper utilities shared by the SQL stores.
//!
//! Table and column names come from the catalog, the plan and the schema
//! probe, never from row data, but they are still quoted everywhere they are
//! spliced into SQL.

use crate::models::{OrderKey, RowUpdate};

/// Quotes an identifier with double quotes, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a table name, optionally qualified by a schema.
pub fn qualified_table(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) => format!("{}.{}", quote_identifier(schema), quote_identifier(table)),
        None => quote_identifier(table),
    }
}

/// `ORDER BY` clause for an order key, ascending.
pub fn order_by_clause(order_key: &OrderKey) -> String {
    let columns: Vec<String> = order_key
        .columns
        .iter()
        .map(|c| format!("{} ASC", quote_identifier(c)))
        .collect();
    format!("ORDER BY {}", columns.join(", "))
}

/// Columns that every update of a page assigns, in first-seen order.
pub fn assigned_columns(updates: &[RowUpdate]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for update in updates {
        for (column, _) in &update.assignments {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
    }
    columns
}

/// Savepoint name for the n-th row of a page.
pub fn savepoint_name(index: usize) -> String {
    format!("dbscramble_row_{}", index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CellValue, RowKey};

    #[test]
    fn test_identifier_escaping() {
        assert_eq!(quote_identifier("email"), "\"email\"");
        assert_eq!(quote_identifier("weird\"column"), "\"weird\"\"column\"");
        assert_eq!(qualified_table(Some("hr"), "cor_users"), "\"hr\".\"cor_users\"");
        assert_eq!(qualified_table(None, "cor_users"), "\"cor_users\"");
    }

    #[test]
    fn test_order_by_clause() {
        assert_eq!(
            order_by_clause(&OrderKey::primary("id")),
            "ORDER BY \"id\" ASC"
        );
        assert_eq!(
            order_by_clause(&OrderKey::with_revision("id", "rev_ver")),
            "ORDER BY \"id\" ASC, \"rev_ver\" ASC"
        );
    }

    #[test]
    fn test_assigned_columns_first_seen_order() {
        let key = RowKey { parts: vec![("id".to_string(), CellValue::Integer(1))] };
        let updates = vec![
            RowUpdate {
                key: key.clone(),
                assignments: vec![("email".to_string(), CellValue::Null)],
            },
            RowUpdate {
                key,
                assignments: vec![
                    ("name".to_string(), CellValue::Null),
                    ("email".to_string(), CellValue::Null),
                ],
            },
        ];
        assert_eq!(assigned_columns(&updates), vec!["email", "name"]);
    }
}

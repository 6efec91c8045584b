//! SQLite page writes.
//!
//! One transaction per page. In per-row mode every row runs inside its own
//! savepoint so a refused row is rolled back without losing the rest of the
//! page.

use crate::adapters::helpers::{quote_identifier, savepoint_name};
use crate::adapters::{RowRejection, WriteOutcome};
use crate::config::CommitMode;
use crate::error::{ScrambleError, StoreFault};
use crate::models::{CellValue, RowUpdate};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqlitePool};

/// `UPDATE` statement for one row, with `?` placeholders for the assigned
/// values followed by the key values.
pub fn update_statement(table: &str, update: &RowUpdate) -> String {
    let assignments: Vec<String> = update
        .assignments
        .iter()
        .map(|(column, _)| format!("{} = ?", quote_identifier(column)))
        .collect();
    let predicates: Vec<String> = update
        .key
        .parts
        .iter()
        .map(|(column, _)| format!("{} = ?", quote_identifier(column)))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {}",
        quote_identifier(table),
        assignments.join(", "),
        predicates.join(" AND ")
    )
}

fn bind_cell<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &CellValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        CellValue::Null => query.bind(None::<String>),
        CellValue::Integer(v) => query.bind(*v),
        CellValue::Real(v) => query.bind(*v),
        CellValue::Text(v) => query.bind(v.clone()),
        CellValue::Boolean(v) => query.bind(*v),
        CellValue::Blob(v) => query.bind(v.clone()),
    }
}

fn bound_update<'q>(sql: &'q str, update: &RowUpdate) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    let mut query = sqlx::query(sql);
    for (_, value) in &update.assignments {
        query = bind_cell(query, value);
    }
    for (_, value) in &update.key.parts {
        query = bind_cell(query, value);
    }
    query
}

async fn savepoint(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    statement: &str,
    table: &str,
) -> Result<(), ScrambleError> {
    sqlx::query(statement)
        .execute(&mut **tx)
        .await
        .map(|_| ())
        .map_err(|e| ScrambleError::query_failed(format!("Savepoint failed on table '{}'", table), e))
}

/// Applies one page of updates.
pub async fn apply_updates(
    pool: &SqlitePool,
    table: &str,
    updates: &[RowUpdate],
    mode: CommitMode,
) -> Result<WriteOutcome, ScrambleError> {
    let mut outcome = WriteOutcome::default();
    if updates.is_empty() {
        return Ok(outcome);
    }

    let mut tx = pool.begin().await.map_err(|e| {
        ScrambleError::query_failed(format!("Failed to begin transaction on '{}'", table), e)
    })?;

    for (index, update) in updates.iter().enumerate() {
        if update.assignments.is_empty() {
            continue;
        }
        let sql = update_statement(table, update);

        match mode {
            CommitMode::AllOrNothing => {
                let done = bound_update(&sql, update)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        ScrambleError::query_failed(
                            format!("Update of row {} in '{}' rejected", update.key, table),
                            e,
                        )
                    })?;
                if done.rows_affected() == 0 {
                    return Err(ScrambleError::query_failed(
                        format!("Update of row {} in '{}' rejected", update.key, table),
                        StoreFault("no row matches key".to_string()),
                    ));
                }
                outcome.applied = outcome.applied.saturating_add(1);
            }
            CommitMode::PerRow => {
                let name = savepoint_name(index);
                savepoint(&mut tx, &format!("SAVEPOINT {}", name), table).await?;

                let reason = match bound_update(&sql, update).execute(&mut *tx).await {
                    Ok(done) if done.rows_affected() > 0 => None,
                    Ok(_) => Some("no row matches key".to_string()),
                    Err(e) => Some(e.to_string()),
                };

                if let Some(reason) = reason {
                    savepoint(&mut tx, &format!("ROLLBACK TO SAVEPOINT {}", name), table).await?;
                    tracing::debug!(table = %table, key = %update.key, "Rolled back to savepoint: {}", reason);
                    outcome.rejected.push(RowRejection {
                        key: update.key.clone(),
                        reason,
                    });
                } else {
                    outcome.applied = outcome.applied.saturating_add(1);
                }
                savepoint(&mut tx, &format!("RELEASE SAVEPOINT {}", name), table).await?;
            }
        }
    }

    tx.commit().await.map_err(|e| {
        ScrambleError::query_failed(format!("Failed to commit page on '{}'", table), e)
    })?;

    Ok(outcome)
}

/// Drops a column.
pub async fn drop_column(pool: &SqlitePool, table: &str, column: &str) -> Result<(), ScrambleError> {
    let statement = format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quote_identifier(table),
        quote_identifier(column)
    );
    sqlx::query(&statement).execute(pool).await.map_err(|e| {
        ScrambleError::query_failed(
            format!("Failed to drop column '{}' from table '{}'", column, table),
            e,
        )
    })?;
    Ok(())
}

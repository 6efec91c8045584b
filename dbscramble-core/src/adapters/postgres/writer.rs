//! PostgreSQL page writes.
//!
//! A failed statement aborts the surrounding transaction in PostgreSQL, so in
//! per-row mode each row runs inside a savepoint that is rolled back on
//! failure before the next row starts.

use super::paging::{ColumnType, table_columns};
use crate::adapters::helpers::{assigned_columns, qualified_table, quote_identifier, savepoint_name};
use crate::adapters::{RowRejection, WriteOutcome};
use crate::config::CommitMode;
use crate::error::{ScrambleError, StoreFault};
use crate::models::RowUpdate;
use sqlx::{PgPool, Postgres};

fn type_of<'a>(types: &'a [ColumnType], table: &str, column: &str) -> Result<&'a str, ScrambleError> {
    types
        .iter()
        .find(|c| c.name == column)
        .map(|c| c.data_type.as_str())
        .ok_or_else(|| ScrambleError::missing_column(table, column))
}

/// `UPDATE` statement for one row. Assigned values come first as `$1..`,
/// key values after them; each placeholder is cast to the declared type.
pub fn update_statement(
    schema: &str,
    table: &str,
    update: &RowUpdate,
    types: &[ColumnType],
) -> Result<String, ScrambleError> {
    let mut placeholder = 0usize;
    let mut next = || {
        placeholder = placeholder.saturating_add(1);
        placeholder
    };

    let mut assignments = Vec::with_capacity(update.assignments.len());
    for (column, _) in &update.assignments {
        assignments.push(format!(
            "{} = CAST(${} AS {})",
            quote_identifier(column),
            next(),
            type_of(types, table, column)?
        ));
    }

    let mut predicates = Vec::with_capacity(update.key.parts.len());
    for (column, _) in &update.key.parts {
        predicates.push(format!(
            "{} = CAST(${} AS {})",
            quote_identifier(column),
            next(),
            type_of(types, table, column)?
        ));
    }

    Ok(format!(
        "UPDATE {} SET {} WHERE {}",
        qualified_table(Some(schema), table),
        assignments.join(", "),
        predicates.join(" AND ")
    ))
}

fn bound_update<'q>(
    sql: &'q str,
    update: &RowUpdate,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    let mut query = sqlx::query(sql);
    for (_, value) in &update.assignments {
        query = query.bind(value.to_text());
    }
    for (_, value) in &update.key.parts {
        query = query.bind(value.to_text());
    }
    query
}

async fn savepoint(
    tx: &mut sqlx::Transaction<'_, Postgres>,
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
    pool: &PgPool,
    schema: &str,
    table: &str,
    updates: &[RowUpdate],
    mode: CommitMode,
) -> Result<WriteOutcome, ScrambleError> {
    let mut outcome = WriteOutcome::default();
    if updates.is_empty() || assigned_columns(updates).is_empty() {
        return Ok(outcome);
    }

    let types = table_columns(pool, schema, table).await?;

    let mut tx = pool.begin().await.map_err(|e| {
        ScrambleError::query_failed(format!("Failed to begin transaction on '{}'", table), e)
    })?;

    for (index, update) in updates.iter().enumerate() {
        if update.assignments.is_empty() {
            continue;
        }
        let sql = update_statement(schema, table, update, &types)?;

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
pub async fn drop_column(
    pool: &PgPool,
    schema: &str,
    table: &str,
    column: &str,
) -> Result<(), ScrambleError> {
    let statement = format!(
        "ALTER TABLE {} DROP COLUMN {}",
        qualified_table(Some(schema), table),
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

//! SQLite-backed pipeline tests.
//!
//! This test suite covers:
//! - Full runs against an in-memory SQLite database
//! - Storage classes surviving a shuffle
//! - Per-row savepoints for constraint violations
//! - Column drops through `ALTER TABLE`

#![cfg(feature = "sqlite")]
#![allow(clippy::unwrap_used)]

use dbscramble_core::adapters::sqlite::SqliteStore;
use dbscramble_core::{
    AnonymizationPlan, ColumnKind, MemoryCheckpointStore, RunController, RunOptions, SchemaProbe,
    TableCatalog, TablePlan, TableStatus,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use sqlx::Row;

async fn store_with(statements: &[&str]) -> SqliteStore {
    let store = SqliteStore::new("sqlite::memory:").await.unwrap();
    for statement in statements {
        sqlx::query(statement).execute(&store.pool).await.unwrap();
    }
    store
}

async fn seed_users(store: &SqliteStore, rows: i64) {
    for i in 0..rows {
        sqlx::query("INSERT INTO cor_users (id, email, iban, score) VALUES (?, ?, ?, ?)")
            .bind(i)
            .bind(format!("first{}.last{}@x.com", i, i))
            .bind(format!("ES{:06}", i))
            .bind(i * 10)
            .execute(&store.pool)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_sqlite_run_preserves_columns_as_multisets() {
    let store = store_with(&[
        "CREATE TABLE cor_users (id INTEGER PRIMARY KEY, email TEXT, iban TEXT, score INTEGER, phone TEXT)",
    ])
    .await;
    seed_users(&store, 30).await;

    let catalog = TableCatalog::from_names(["cor_users"]).unwrap();
    let plan = AnonymizationPlan::new().with_table(
        "cor_users",
        TablePlan::new()
            .drop_column("phone")
            .column("email", ColumnKind::Email)
            .column("iban", ColumnKind::Opaque)
            .column("score", ColumnKind::Opaque),
    );
    let checkpoints = MemoryCheckpointStore::new();
    let controller = RunController::new(&store, &checkpoints, &catalog, &plan)
        .with_options(RunOptions::new().with_page_size(8));
    let mut rng = StdRng::seed_from_u64(17);

    let report = controller.run(&mut rng).await.unwrap();
    let table = report.table("cor_users").unwrap();
    assert_eq!(table.status, TableStatus::Completed);
    assert_eq!(table.rows, 30);
    assert_eq!(table.pages, 4);
    assert_eq!(table.dropped, vec!["phone".to_string()]);

    let columns = store.columns("cor_users").await.unwrap();
    assert_eq!(columns, vec!["id", "email", "iban", "score"]);

    let rows = sqlx::query("SELECT id, email, iban, score FROM cor_users ORDER BY id")
        .fetch_all(&store.pool)
        .await
        .unwrap();
    assert_eq!(rows.len(), 30);

    let mut ibans: Vec<String> = rows.iter().map(|r| r.get::<String, _>("iban")).collect();
    ibans.sort();
    let expected: Vec<String> = (0..30).map(|i| format!("ES{:06}", i)).collect();
    assert_eq!(ibans, expected);

    // Integers stay integers.
    let mut scores: Vec<i64> = rows.iter().map(|r| r.get::<i64, _>("score")).collect();
    scores.sort_unstable();
    assert_eq!(scores, (0..30).map(|i| i * 10).collect::<Vec<i64>>());

    for row in &rows {
        let email: String = row.get("email");
        let (local, domain) = email.split_once('@').unwrap();
        assert_eq!(domain, "x.com");
        let tokens: Vec<&str> = local.split('.').collect();
        assert_eq!(tokens.len(), 2);
        assert!(tokens[0].starts_with("first"));
        assert!(tokens[1].starts_with("last"));
    }
}

#[tokio::test]
async fn test_sqlite_constraint_violation_rolls_back_one_row() {
    let store = store_with(&[
        "CREATE TABLE accounts (id INTEGER PRIMARY KEY, email TEXT CHECK (id = 1 OR email <> 'ana@x.com'))",
        "INSERT INTO accounts (id, email) VALUES (1, 'ana@x.com'), (2, 'bea@x.com')",
    ])
    .await;

    let catalog = TableCatalog::from_names(["accounts"]).unwrap();
    let plan = AnonymizationPlan::new()
        .with_table("accounts", TablePlan::new().column("email", ColumnKind::Opaque));
    let checkpoints = MemoryCheckpointStore::new();
    // With two rows and this many attempts the rows swap.
    let controller = RunController::new(&store, &checkpoints, &catalog, &plan)
        .with_options(RunOptions::new().with_max_attempts(64));
    let mut rng = StdRng::seed_from_u64(23);

    let report = controller.run(&mut rng).await.unwrap();
    assert_eq!(report.table("accounts").unwrap().rejected, 1);

    let emails: Vec<String> = sqlx::query_scalar("SELECT email FROM accounts ORDER BY id")
        .fetch_all(&store.pool)
        .await
        .unwrap();
    assert_eq!(emails, vec!["bea@x.com".to_string(), "bea@x.com".to_string()]);
}

#[tokio::test]
async fn test_sqlite_missing_column_aborts_without_writes() {
    let store = store_with(&[
        "CREATE TABLE cor_users (id INTEGER PRIMARY KEY, email TEXT, iban TEXT, score INTEGER)",
    ])
    .await;
    seed_users(&store, 3).await;

    let catalog = TableCatalog::from_names(["cor_users"]).unwrap();
    let plan = AnonymizationPlan::new().with_table(
        "cor_users",
        TablePlan::new()
            .drop_column("iban")
            .column("full_name", ColumnKind::PersonName),
    );
    let checkpoints = MemoryCheckpointStore::new();
    let controller = RunController::new(&store, &checkpoints, &catalog, &plan);
    let mut rng = StdRng::seed_from_u64(29);

    let aborted = controller.run(&mut rng).await.unwrap_err();
    assert!(aborted.error.is_schema_failure());

    // The layout is checked before anything is dropped.
    let columns = store.columns("cor_users").await.unwrap();
    assert!(columns.contains(&"iban".to_string()));
}

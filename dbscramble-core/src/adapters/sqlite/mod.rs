//! SQLite store.
//!
//! # Module Structure
//! - `connection`: Connection handling (single connection, no pooling)
//! - `paging`: `PRAGMA table_info` probe and ordered page reads
//! - `writer`: Per-page transactions with per-row savepoints
//!
//! # SQLite-Specific Notes
//! - Values keep their storage class (INTEGER, REAL, TEXT, BLOB)
//! - In-memory databases live as long as the store
//! - `DROP COLUMN` needs SQLite 3.35 or newer

pub mod connection;
pub mod paging;
pub mod writer;

use super::{SchemaProbe, StoreType, TableReader, TableWriter, WriteOutcome};
use crate::Result;
use crate::config::{CommitMode, ConnectionConfig};
use crate::models::{OrderKey, Page, RowUpdate};
use async_trait::async_trait;
use sqlx::SqlitePool;

/// SQLite store backed by a single-connection pool.
pub struct SqliteStore {
    /// Connection pool (one connection)
    pub pool: SqlitePool,
    /// Connection configuration
    pub config: ConnectionConfig,
    /// Original connection string (kept for reference, public for test access)
    pub connection_string: String,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("config", &self.config)
            .field("is_in_memory", &self.is_in_memory())
            // connection_string may carry credentials
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SchemaProbe for SqliteStore {
    async fn columns(&self, table: &str) -> Result<Vec<String>> {
        paging::table_columns(&self.pool, table).await
    }

    async fn test_connection(&self) -> Result<()> {
        let connectivity_result: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(crate::error::ScrambleError::connection_failed)?;

        if connectivity_result != 1 {
            return Err(crate::error::ScrambleError::configuration(
                "Basic connectivity test failed: unexpected result",
            ));
        }

        Ok(())
    }

    fn store_type(&self) -> StoreType {
        StoreType::SQLite
    }
}

#[async_trait]
impl TableReader for SqliteStore {
    async fn read_page(
        &self,
        table: &str,
        order_key: &OrderKey,
        columns: &[String],
        page_size: u64,
        offset: u64,
    ) -> Result<Page> {
        paging::read_page(&self.pool, table, order_key, columns, page_size, offset).await
    }
}

#[async_trait]
impl TableWriter for SqliteStore {
    async fn apply_updates(
        &self,
        table: &str,
        updates: &[RowUpdate],
        mode: CommitMode,
    ) -> Result<WriteOutcome> {
        writer::apply_updates(&self.pool, table, updates, mode).await
    }

    async fn drop_column(&self, table: &str, column: &str) -> Result<()> {
        writer::drop_column(&self.pool, table, column).await
    }
}

//! PostgreSQL store.
//!
//! # Module Structure
//! - `connection`: Connection pool management and validation
//! - `paging`: `pg_attribute` probe and ordered page reads
//! - `writer`: Per-page transactions with per-row savepoints
//!
//! Values are read as text and written back through `CAST($n AS <type>)`
//! using the declared column type, so every PostgreSQL type survives the
//! shuffle without a type mapping table.

mod connection;
pub mod paging;
pub mod writer;

use super::{SchemaProbe, StoreType, TableReader, TableWriter, WriteOutcome};
use crate::Result;
use crate::config::{CommitMode, ConnectionConfig};
use crate::models::{OrderKey, Page, RowUpdate};
use async_trait::async_trait;
use sqlx::PgPool;

/// PostgreSQL store.
pub struct PostgresStore {
    pub pool: PgPool,
    pub config: ConnectionConfig,
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("config", &self.config)
            .field("pool_size", &self.pool.size())
            .field("pool_idle", &self.pool.num_idle())
            .finish()
    }
}

#[async_trait]
impl SchemaProbe for PostgresStore {
    async fn columns(&self, table: &str) -> Result<Vec<String>> {
        let columns = paging::table_columns(&self.pool, &self.config.schema, table).await?;
        Ok(columns.into_iter().map(|c| c.name).collect())
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
        StoreType::PostgreSQL
    }
}

#[async_trait]
impl TableReader for PostgresStore {
    async fn read_page(
        &self,
        table: &str,
        order_key: &OrderKey,
        columns: &[String],
        page_size: u64,
        offset: u64,
    ) -> Result<Page> {
        paging::read_page(
            &self.pool,
            &self.config.schema,
            table,
            order_key,
            columns,
            page_size,
            offset,
        )
        .await
    }
}

#[async_trait]
impl TableWriter for PostgresStore {
    async fn apply_updates(
        &self,
        table: &str,
        updates: &[RowUpdate],
        mode: CommitMode,
    ) -> Result<WriteOutcome> {
        writer::apply_updates(&self.pool, &self.config.schema, table, updates, mode).await
    }

    async fn drop_column(&self, table: &str, column: &str) -> Result<()> {
        writer::drop_column(&self.pool, &self.config.schema, table, column).await
    }
}

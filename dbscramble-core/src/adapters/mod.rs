//! Storage capabilities and the store factory.
//!
//! The engine talks to a database only through three narrow capabilities:
//! - [`SchemaProbe`]: ordered column names of a table
//! - [`TableReader`]: one page of rows under a stable order
//! - [`TableWriter`]: one transaction of row updates per page, plus the
//!   column drop used before paging
//!
//! Every adapter implements all three; [`TableStore`] is their union and is
//! what [`create_store`] hands out.
//!
//! # Module Structure
//! - `helpers`: identifier quoting and SQL fragments shared by the SQL stores
//! - `memory`: in-process store with failure injection
//! - `sqlite`, `postgres`: feature-gated SQL stores
//!
//! # Object Safety
//! All traits are object-safe so stores can be used as `Box<dyn TableStore>`.

use crate::config::{CommitMode, ConnectionConfig};
use crate::models::{OrderKey, Page, RowKey, RowUpdate};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod helpers;
pub mod memory;

#[cfg(feature = "postgresql")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;

/// Backends a store can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreType {
    /// PostgreSQL via sqlx
    PostgreSQL,
    /// SQLite via sqlx
    SQLite,
    /// In-process tables
    Memory,
}

impl std::fmt::Display for StoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PostgreSQL => write!(f, "PostgreSQL"),
            Self::SQLite => write!(f, "SQLite"),
            Self::Memory => write!(f, "Memory"),
        }
    }
}

/// A row update the store refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowRejection {
    /// Key of the refused row
    pub key: RowKey,
    /// Store message, never containing the new values
    pub reason: String,
}

/// Result of committing one page of updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteOutcome {
    /// Rows updated
    pub applied: u64,
    /// Rows refused and left unchanged
    pub rejected: Vec<RowRejection>,
}

impl WriteOutcome {
    /// True when no row was refused.
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Describes tables.
#[async_trait]
pub trait SchemaProbe: Send + Sync {
    /// Ordered column names of `table`. The first column is the primary key.
    ///
    /// # Errors
    /// Returns `MissingTable` if the table does not exist
    async fn columns(&self, table: &str) -> Result<Vec<String>>;

    /// Verifies the store is reachable.
    async fn test_connection(&self) -> Result<()>;

    /// The backend behind this store.
    fn store_type(&self) -> StoreType;
}

/// Reads pages of a table.
#[async_trait]
pub trait TableReader: Send + Sync {
    /// Returns up to `page_size` rows of `columns`, ordered by `order_key`,
    /// skipping the first `offset` rows. An empty page marks the end of the
    /// table.
    ///
    /// The same offset must yield the same rows as long as the order key
    /// columns are not modified.
    async fn read_page(
        &self,
        table: &str,
        order_key: &OrderKey,
        columns: &[String],
        page_size: u64,
        offset: u64,
    ) -> Result<Page>;
}

/// Writes row updates.
#[async_trait]
pub trait TableWriter: Send + Sync {
    /// Applies one page of updates in a single transaction.
    ///
    /// In [`CommitMode::PerRow`] a refused row is rolled back on its own and
    /// reported in the outcome. In [`CommitMode::AllOrNothing`] a refused row
    /// rolls back the whole page and is returned as an error.
    async fn apply_updates(
        &self,
        table: &str,
        updates: &[RowUpdate],
        mode: CommitMode,
    ) -> Result<WriteOutcome>;

    /// Drops a column from a table.
    async fn drop_column(&self, table: &str, column: &str) -> Result<()>;
}

/// Everything the run controller needs from a store.
pub trait TableStore: SchemaProbe + TableReader + TableWriter {}

impl<T> TableStore for T where T: SchemaProbe + TableReader + TableWriter {}

/// Creates a store for a connection URL.
///
/// # Arguments
/// * `connection_string` - Database URL (sanitized in errors)
/// * `config` - Pool and schema settings
///
/// # Errors
/// Returns error if the URL is not recognized, the backend was not compiled
/// in, or the connection cannot be set up
pub async fn create_store(
    connection_string: &str,
    config: &ConnectionConfig,
) -> Result<Box<dyn TableStore>> {
    config.validate()?;
    let store_type = detect_store_type(connection_string)?;

    match store_type {
        #[cfg(feature = "postgresql")]
        StoreType::PostgreSQL => {
            let store = postgres::PostgresStore::with_config(connection_string, config.clone()).await?;
            Ok(Box::new(store))
        }
        #[cfg(not(feature = "postgresql"))]
        StoreType::PostgreSQL => Err(crate::error::ScrambleError::unsupported_feature(
            "PostgreSQL store",
            "Compile with --features postgresql to enable PostgreSQL support",
        )),
        #[cfg(feature = "sqlite")]
        StoreType::SQLite => {
            let store = sqlite::SqliteStore::with_config(connection_string, config.clone()).await?;
            Ok(Box::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StoreType::SQLite => Err(crate::error::ScrambleError::unsupported_feature(
            "SQLite store",
            "Compile with --features sqlite to enable SQLite support",
        )),
        StoreType::Memory => Err(crate::error::ScrambleError::unsupported_feature(
            "Memory store",
            "connection URLs (build a MemoryStore directly)",
        )),
    }
}

/// Detects the backend from a connection string.
///
/// # Errors
/// Returns error if connection string format is unrecognized
pub fn detect_store_type(connection_string: &str) -> Result<StoreType> {
    if connection_string.starts_with("postgres://") || connection_string.starts_with("postgresql://")
    {
        Ok(StoreType::PostgreSQL)
    } else if connection_string.starts_with("sqlite:")
        || connection_string == ":memory:"
        || connection_string.ends_with(".db")
        || connection_string.ends_with(".sqlite")
        || connection_string.ends_with(".sqlite3")
    {
        Ok(StoreType::SQLite)
    } else if connection_string.starts_with("memory:") {
        Ok(StoreType::Memory)
    } else {
        Err(crate::error::ScrambleError::configuration(
            "Unrecognized database connection string format",
        ))
    }
}

/// Backends compiled into this build.
pub fn supported_stores() -> Vec<(StoreType, &'static str)> {
    let mut stores = Vec::new();
    #[cfg(feature = "postgresql")]
    stores.push((StoreType::PostgreSQL, "postgres://user@host/db"));
    #[cfg(feature = "sqlite")]
    stores.push((StoreType::SQLite, "sqlite:///path/to/file.db"));
    stores
}

//! SQLite connection handling.
//!
//! # Connection Modes
//! - File-based: `sqlite:///path/to/database.db` or `sqlite://./relative.db`
//! - In-memory: `sqlite::memory:` or `:memory:`
//!
//! The store always uses exactly one connection: writes are serialized anyway,
//! and an in-memory database only exists on the connection that created it.

use super::SqliteStore;
use crate::Result;
use crate::config::ConnectionConfig;
use sqlx::SqlitePool;
use url::Url;

impl SqliteStore {
    /// Creates a new SQLite store from a connection string.
    ///
    /// # Errors
    /// Returns error if:
    /// - Connection string format is invalid
    /// - Database cannot be opened
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::with_config(connection_string, ConnectionConfig::default()).await
    }

    /// Creates a new SQLite store with custom configuration.
    ///
    /// # Arguments
    /// * `connection_string` - SQLite connection URL or file path
    /// * `config` - Custom connection configuration
    pub async fn with_config(connection_string: &str, config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        validate_sqlite_connection_string(connection_string)?;
        let in_memory = is_in_memory_string(connection_string);
        let pool = create_sqlite_connection(connection_string, &config, in_memory).await?;

        Ok(Self {
            pool,
            config,
            connection_string: connection_string.to_string(),
        })
    }

    /// Checks if the connection is to an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        is_in_memory_string(&self.connection_string)
    }

    /// Closes the connection gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_in_memory_string(connection_string: &str) -> bool {
    connection_string.contains(":memory:") || connection_string.contains("mode=memory")
}

/// Validates SQLite connection string format.
///
/// # Errors
/// Returns error if connection string is invalid
pub fn validate_sqlite_connection_string(connection_string: &str) -> Result<()> {
    if connection_string == ":memory:" {
        return Ok(());
    }

    if connection_string.ends_with(".db")
        || connection_string.ends_with(".sqlite")
        || connection_string.ends_with(".sqlite3")
    {
        return Ok(());
    }

    if connection_string.starts_with("sqlite:") {
        if is_in_memory_string(connection_string) {
            return Ok(());
        }

        if let Ok(url) = Url::parse(connection_string) {
            if url.scheme() != "sqlite" {
                return Err(crate::error::ScrambleError::configuration(
                    "Connection string must use sqlite:// scheme",
                ));
            }
            return Ok(());
        }

        if connection_string.starts_with("sqlite://") {
            return Ok(());
        }
    }

    Err(crate::error::ScrambleError::configuration(
        "Invalid SQLite connection string format: expected sqlite:// URL, file path, or :memory:",
    ))
}

/// Creates the single-connection pool.
async fn create_sqlite_connection(
    connection_string: &str,
    config: &ConnectionConfig,
    in_memory: bool,
) -> Result<SqlitePool> {
    use sqlx::sqlite::SqliteConnectOptions;
    use std::str::FromStr;

    let normalized = normalize_connection_string(connection_string);

    let options = SqliteConnectOptions::from_str(&normalized).map_err(|e| {
        crate::error::ScrambleError::configuration(format!(
            "Invalid SQLite connection string: {}",
            e
        ))
    })?;

    let mut pool_options = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(config.connect_timeout);

    if in_memory {
        // Closing the only connection would discard the database.
        pool_options = pool_options
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }

    let pool = pool_options.connect_with(options).await.map_err(|e| {
        crate::error::ScrambleError::Connection {
            context: "Failed to open SQLite database".to_string(),
            source: Box::new(e),
        }
    })?;

    Ok(pool)
}

/// Normalizes connection string to SQLite URL format.
fn normalize_connection_string(connection_string: &str) -> String {
    if connection_string == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    if connection_string.starts_with("sqlite:") {
        return connection_string.to_string();
    }

    format!("sqlite://{}", connection_string)
}

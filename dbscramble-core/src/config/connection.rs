//! Store connection configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings used when opening a SQL store.
///
/// The run controller issues one statement at a time, so a single pooled
/// connection is enough; a second one lets `check` probe while nothing else
/// runs.
///
/// # Example
/// ```rust
/// use dbscramble_core::config::ConnectionConfig;
///
/// let config = ConnectionConfig::new().with_schema("hr");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// PostgreSQL schema holding the cataloged tables
    pub schema: String,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Maximum number of connections in pool
    pub max_connections: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            connect_timeout: Duration::from_secs(30),
            max_connections: 2,
        }
    }
}

impl ConnectionConfig {
    /// Creates a connection config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the schema.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Builder method to set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder method to set the pool size.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Validates connection configuration parameters.
    ///
    /// # Errors
    /// Returns error if configuration values are invalid
    pub fn validate(&self) -> crate::Result<()> {
        if self.schema.trim().is_empty() {
            return Err(crate::error::ScrambleError::configuration(
                "schema cannot be empty",
            ));
        }

        if self.max_connections == 0 {
            return Err(crate::error::ScrambleError::configuration(
                "max_connections must be greater than 0",
            ));
        }

        if self.connect_timeout.as_secs() == 0 {
            return Err(crate::error::ScrambleError::configuration(
                "connect_timeout must be greater than 0",
            ));
        }

        Ok(())
    }
}

//! Table catalog.
//!
//! The ordered list of tables a run walks through. The file format is a
//! one-column CSV: the first comma-separated field of each non-blank line is a
//! table name, and its position is the order of that line among the tables.
//! Lines starting with `#` are comments.

use crate::error::ScrambleError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// One cataloged table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Table name
    pub name: String,
    /// Zero-based position in run order
    pub position: usize,
}

/// Immutable, ordered table list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableCatalog {
    entries: Vec<CatalogEntry>,
}

impl TableCatalog {
    /// Builds a catalog from table names in run order.
    ///
    /// # Errors
    /// Returns a configuration error for empty or duplicate names
    pub fn from_names<I, S>(names: I) -> crate::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for name in names {
            let name: String = name.into();
            if name.is_empty() {
                return Err(ScrambleError::configuration("catalog contains an empty table name"));
            }
            if !seen.insert(name.clone()) {
                return Err(ScrambleError::configuration(format!(
                    "table '{}' appears more than once in the catalog",
                    name
                )));
            }
            let position = entries.len();
            entries.push(CatalogEntry { name, position });
        }

        Ok(Self { entries })
    }

    /// Parses catalog text.
    ///
    /// # Errors
    /// Returns a configuration error for duplicate names
    pub fn parse(text: &str) -> crate::Result<Self> {
        let names = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split(',').next())
            .map(|name| name.trim().trim_matches('"').to_string())
            .filter(|name| !name.is_empty());
        Self::from_names(names)
    }

    /// Loads a catalog file.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be read, or a configuration
    /// error for an empty or invalid catalog
    pub async fn load(path: &Path) -> crate::Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ScrambleError::Io {
                context: format!("Failed to read catalog file {}", path.display()),
                source: e,
            })?;
        let catalog = Self::parse(&text)?;
        if catalog.is_empty() {
            return Err(ScrambleError::configuration(format!(
                "catalog file {} lists no tables",
                path.display()
            )));
        }
        Ok(catalog)
    }

    /// Entries in run order.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Position of a table, if cataloged.
    pub fn position(&self, table: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|entry| entry.name == table)
            .map(|entry| entry.position)
    }

    /// The entry that follows `position`, if any.
    pub fn next_after(&self, position: usize) -> Option<&CatalogEntry> {
        self.entries.get(position.saturating_add(1))
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True for an empty catalog.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

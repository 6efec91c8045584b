//! Anonymization plan.
//!
//! Data-driven description of what happens to each table: which columns are
//! dropped, which are shuffled and how, and which columns move together as a
//! block. Loaded from JSON:
//!
//! ```json
//! {
//!   "tables": {
//!     "cor_users": {
//!       "drop_columns": ["phone"],
//!       "columns": [
//!         { "name": "email", "kind": "email" },
//!         { "name": "full_name", "kind": "person-name" },
//!         { "name": "last_ip", "kind": "ipv4-octets" }
//!       ],
//!       "groups": [
//!         { "name": "address", "columns": ["street", "number", "postcode"] }
//!       ]
//!     }
//!   }
//! }
//! ```

use crate::error::ScrambleError;
use crate::models::{ColumnKind, ColumnRule};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Columns permuted together as one tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnGroup {
    /// Label used in logs
    pub name: String,
    /// Member columns
    pub columns: Vec<String>,
}

impl ColumnGroup {
    /// Creates a group.
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

/// What to do with one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TablePlan {
    /// Columns removed outright before paging
    pub drop_columns: Vec<String>,
    /// Individually shuffled or scrambled columns
    pub columns: Vec<ColumnRule>,
    /// Correlated blocks
    pub groups: Vec<ColumnGroup>,
    /// Secondary order key; audit tables get one by default
    pub revision_column: Option<String>,
    /// Report the table as skipped instead of aborting when it or one of its
    /// columns is missing
    pub skip_if_missing: bool,
}

impl TablePlan {
    /// Creates an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to add a dropped column.
    pub fn drop_column(mut self, column: impl Into<String>) -> Self {
        self.drop_columns.push(column.into());
        self
    }

    /// Builder method to add a column rule.
    pub fn column(mut self, name: impl Into<String>, kind: ColumnKind) -> Self {
        self.columns.push(ColumnRule::new(name, kind));
        self
    }

    /// Builder method to add a correlated block.
    pub fn group(mut self, name: impl Into<String>, columns: &[&str]) -> Self {
        self.groups.push(ColumnGroup::new(name, columns));
        self
    }

    /// Builder method to set the revision column.
    pub fn with_revision_column(mut self, column: impl Into<String>) -> Self {
        self.revision_column = Some(column.into());
        self
    }

    /// Builder method to tolerate missing tables and columns.
    pub fn with_skip_if_missing(mut self, skip: bool) -> Self {
        self.skip_if_missing = skip;
        self
    }

    /// Rules that take part in paging (everything but `grouped` markers,
    /// which are handled through their group).
    pub fn page_rules(&self) -> impl Iterator<Item = &ColumnRule> {
        self.columns
            .iter()
            .filter(|rule| rule.kind != ColumnKind::Grouped)
    }

    /// True when the table needs to be paged at all.
    pub fn has_page_work(&self) -> bool {
        self.page_rules().next().is_some() || !self.groups.is_empty()
    }

    /// Every column that is rewritten page by page.
    pub fn rewritten_columns(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.page_rules().map(|rule| rule.name.as_str()).collect();
        for group in &self.groups {
            names.extend(group.columns.iter().map(String::as_str));
        }
        names
    }

    /// Validates the plan of `table`.
    ///
    /// # Errors
    /// Returns a configuration error for empty groups, a column configured
    /// twice, a `grouped` rule outside any group, a rewritten column that is
    /// also dropped, or a rewritten revision column
    pub fn validate(&self, table: &str) -> crate::Result<()> {
        let mut seen = HashSet::new();

        for group in &self.groups {
            if group.columns.is_empty() {
                return Err(ScrambleError::configuration(format!(
                    "group '{}' of table '{}' has no columns",
                    group.name, table
                )));
            }
        }

        for name in self.rewritten_columns() {
            if !seen.insert(name) {
                return Err(ScrambleError::configuration(format!(
                    "column '{}' of table '{}' is configured more than once",
                    name, table
                )));
            }
        }

        for rule in self.columns.iter().filter(|r| r.kind == ColumnKind::Grouped) {
            if !self.groups.iter().any(|g| g.columns.contains(&rule.name)) {
                return Err(ScrambleError::configuration(format!(
                    "column '{}' of table '{}' is marked grouped but belongs to no group",
                    rule.name, table
                )));
            }
        }

        if let Some(dropped) = self.drop_columns.iter().find(|c| seen.contains(c.as_str())) {
            return Err(ScrambleError::configuration(format!(
                "column '{}' of table '{}' is both dropped and shuffled",
                dropped, table
            )));
        }

        if let Some(revision) = &self.revision_column
            && seen.contains(revision.as_str())
        {
            return Err(ScrambleError::configuration(format!(
                "revision column '{}' of table '{}' cannot be anonymized",
                revision, table
            )));
        }

        Ok(())
    }
}

/// The full plan, keyed by table name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnonymizationPlan {
    /// Plans by table name
    pub tables: BTreeMap<String, TablePlan>,
}

impl AnonymizationPlan {
    /// Creates an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to add a table plan.
    pub fn with_table(mut self, table: impl Into<String>, plan: TablePlan) -> Self {
        self.tables.insert(table.into(), plan);
        self
    }

    /// Parses a plan from JSON.
    ///
    /// # Errors
    /// Returns a serialization error for malformed JSON
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| ScrambleError::Serialization {
            context: "Failed to parse anonymization plan".to_string(),
            source: e,
        })
    }

    /// Loads and validates a plan file.
    ///
    /// # Errors
    /// Returns an I/O, serialization or configuration error
    pub async fn load(path: &Path) -> crate::Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ScrambleError::Io {
                context: format!("Failed to read plan file {}", path.display()),
                source: e,
            })?;
        let plan = Self::from_json(&json)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Plan for `table`. An audit table without its own entry shares the plan
    /// of its base table.
    pub fn plan_for(&self, table: &str, audit_suffix: &str) -> Option<&TablePlan> {
        self.tables.get(table).or_else(|| {
            if audit_suffix.is_empty() {
                return None;
            }
            table
                .strip_suffix(audit_suffix)
                .and_then(|base| self.tables.get(base))
        })
    }

    /// Validates every table plan.
    ///
    /// # Errors
    /// Returns the first configuration error found
    pub fn validate(&self) -> crate::Result<()> {
        for (table, plan) in &self.tables {
            plan.validate(table)?;
        }
        Ok(())
    }
}

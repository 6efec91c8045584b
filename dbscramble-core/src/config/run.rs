//! Run options.
//!
//! Controls paging, retry budget, commit semantics and how sparse sub-field
//! slots are treated.

use crate::error::ScrambleError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How a page of row updates is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitMode {
    /// Rejected rows are rolled back individually and reported; the page
    /// still commits
    #[default]
    PerRow,
    /// Any rejected row fails the whole page
    AllOrNothing,
}

impl FromStr for CommitMode {
    type Err = ScrambleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "per-row" | "row" => Ok(Self::PerRow),
            "all-or-nothing" | "page" => Ok(Self::AllOrNothing),
            other => Err(ScrambleError::configuration(format!(
                "unknown commit mode '{}' (expected per-row or all-or-nothing)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for CommitMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerRow => write!(f, "per-row"),
            Self::AllOrNothing => write!(f, "all-or-nothing"),
        }
    }
}

/// Treatment of sub-field slots that are NULL for some rows of a page.
///
/// Composite values decompose into a varying number of tokens, so a page is
/// padded with NULLs up to its longest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SparseSlotPolicy {
    /// Permute every slot across all rows, padding included
    #[default]
    ShuffleAll,
    /// Permute a slot only among rows that have a token in it
    PresentOnly,
    /// Leave slots whose NULL ratio exceeds the threshold in place
    SkipSparse,
}

impl FromStr for SparseSlotPolicy {
    type Err = ScrambleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "shuffle-all" | "all" => Ok(Self::ShuffleAll),
            "present-only" | "present" => Ok(Self::PresentOnly),
            "skip-sparse" | "skip" => Ok(Self::SkipSparse),
            other => Err(ScrambleError::configuration(format!(
                "unknown sparse slot policy '{}' (expected shuffle-all, present-only or skip-sparse)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for SparseSlotPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShuffleAll => write!(f, "shuffle-all"),
            Self::PresentOnly => write!(f, "present-only"),
            Self::SkipSparse => write!(f, "skip-sparse"),
        }
    }
}

/// Options for one scramble run.
///
/// # Example
/// ```rust
/// use dbscramble_core::config::{CommitMode, RunOptions};
///
/// let options = RunOptions::new()
///     .with_page_size(10_000)
///     .with_commit_mode(CommitMode::AllOrNothing);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Rows fetched, shuffled and committed per page
    pub page_size: u64,
    /// Draws per row before the permutation engine accepts a conflict
    pub max_attempts: usize,
    /// Page commit semantics
    pub commit_mode: CommitMode,
    /// Sparse sub-field slot handling
    pub sparse_slots: SparseSlotPolicy,
    /// NULL ratio above which `SkipSparse` leaves a slot alone
    pub sparse_null_ratio: f64,
    /// Table name suffix marking audit/history tables
    pub audit_suffix: String,
    /// Revision column appended to the order key of audit tables
    pub audit_revision_column: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            page_size: 500_000,
            max_attempts: 5,
            commit_mode: CommitMode::default(),
            sparse_slots: SparseSlotPolicy::default(),
            sparse_null_ratio: 0.5,
            audit_suffix: "_aud".to_string(),
            audit_revision_column: "rev_ver".to_string(),
        }
    }
}

impl RunOptions {
    /// Creates run options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the page size.
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    /// Builder method to set the retry budget.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Builder method to set the commit mode.
    pub fn with_commit_mode(mut self, mode: CommitMode) -> Self {
        self.commit_mode = mode;
        self
    }

    /// Builder method to set the sparse slot policy.
    pub fn with_sparse_slots(mut self, policy: SparseSlotPolicy) -> Self {
        self.sparse_slots = policy;
        self
    }

    /// Builder method to set the `SkipSparse` threshold.
    pub fn with_sparse_null_ratio(mut self, ratio: f64) -> Self {
        self.sparse_null_ratio = ratio;
        self
    }

    /// Builder method to set the audit table suffix and revision column.
    pub fn with_audit(mut self, suffix: impl Into<String>, revision_column: impl Into<String>) -> Self {
        self.audit_suffix = suffix.into();
        self.audit_revision_column = revision_column.into();
        self
    }

    /// True if `table` is an audit/history table.
    pub fn is_audit_table(&self, table: &str) -> bool {
        !self.audit_suffix.is_empty() && table.ends_with(&self.audit_suffix)
    }

    /// Validates run options.
    ///
    /// # Errors
    /// Returns error if a value would make the run meaningless
    pub fn validate(&self) -> crate::Result<()> {
        if self.page_size == 0 {
            return Err(ScrambleError::configuration(
                "page_size must be greater than 0",
            ));
        }

        if self.max_attempts == 0 {
            return Err(ScrambleError::configuration(
                "max_attempts must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&self.sparse_null_ratio) {
            return Err(ScrambleError::configuration(
                "sparse_null_ratio must be between 0.0 and 1.0",
            ));
        }

        if self.audit_revision_column.trim().is_empty() {
            return Err(ScrambleError::configuration(
                "audit_revision_column cannot be empty",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_options_default() {
        let options = RunOptions::default();
        assert_eq!(options.page_size, 500_000);
        assert_eq!(options.max_attempts, 5);
        assert_eq!(options.commit_mode, CommitMode::PerRow);
        assert_eq!(options.sparse_slots, SparseSlotPolicy::ShuffleAll);
        assert_eq!(options.audit_suffix, "_aud");
        assert_eq!(options.audit_revision_column, "rev_ver");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_run_options_builder() {
        let options = RunOptions::new()
            .with_page_size(3)
            .with_max_attempts(9)
            .with_sparse_slots(SparseSlotPolicy::PresentOnly)
            .with_audit("_hist", "revision");

        assert_eq!(options.page_size, 3);
        assert_eq!(options.max_attempts, 9);
        assert_eq!(options.sparse_slots, SparseSlotPolicy::PresentOnly);
        assert!(options.is_audit_table("cor_users_hist"));
        assert!(!options.is_audit_table("cor_users_aud"));
    }

    #[test]
    fn test_run_options_validation() {
        assert!(RunOptions::new().with_page_size(0).validate().is_err());
        assert!(RunOptions::new().with_max_attempts(0).validate().is_err());
        assert!(RunOptions::new().with_sparse_null_ratio(1.5).validate().is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("per-row".parse::<CommitMode>().unwrap(), CommitMode::PerRow);
        assert_eq!(
            "ALL-OR-NOTHING".parse::<CommitMode>().unwrap(),
            CommitMode::AllOrNothing
        );
        assert!("sometimes".parse::<CommitMode>().is_err());

        assert_eq!(
            "skip-sparse".parse::<SparseSlotPolicy>().unwrap(),
            SparseSlotPolicy::SkipSparse
        );
        assert_eq!(SparseSlotPolicy::PresentOnly.to_string(), "present-only");
        assert!("random".parse::<SparseSlotPolicy>().is_err());
    }
}

//! Configuration types for a scramble run.
//!
//! - `RunOptions`: paging, retry budget, commit mode and sparse-slot policy
//! - `AnonymizationPlan`: per-table drop lists, column kinds and groups
//! - `ConnectionConfig`: pool settings for the SQL stores
//!
//! # Security
//! None of these structs store credentials. The database URL is passed
//! separately and only ever logged through `redact_database_url`.

mod connection;
mod plan;
mod run;

pub use connection::ConnectionConfig;
pub use plan::{AnonymizationPlan, ColumnGroup, TablePlan};
pub use run::{CommitMode, RunOptions, SparseSlotPolicy};

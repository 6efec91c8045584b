//! Permutation engine and checkpointed page pipeline for dbscramble.
//!
//! This crate anonymizes personally identifiable columns of large tables in
//! place. Values are permuted across the rows of a page, so every column keeps
//! its multiset of values while the row-to-value association is broken.
//! Composite fields (emails, full names) are split into tokens that move on
//! their own and are reassembled afterwards.
//!
//! # Data Guarantees
//! - Every shuffled column is a permutation of itself: nothing is invented,
//!   dropped or duplicated
//! - Columns listed in a correlated group move as one tuple
//! - Values of anonymized columns are never logged
//! - Connection strings are redacted in errors and logs
//!
//! # Architecture
//! - [`codec`], [`shuffle`]: pure transforms, randomness injected by the caller
//! - [`page`]: turns one page into row updates
//! - [`runner`]: walks the catalog, commits pages and records the checkpoint
//! - [`adapters`]: the store capabilities and their SQLite, PostgreSQL and
//!   in-memory implementations

pub mod adapters;
pub mod catalog;
pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod page;
pub mod runner;
pub mod shuffle;

// Re-export commonly used types
pub use adapters::{
    MemoryStore, SchemaProbe, StoreType, TableReader, TableStore, TableWriter, WriteOutcome,
    create_store,
};
pub use catalog::{CatalogEntry, TableCatalog};
pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use config::{
    AnonymizationPlan, ColumnGroup, CommitMode, ConnectionConfig, RunOptions, SparseSlotPolicy,
    TablePlan,
};
pub use error::{Result, ScrambleError};
pub use logging::init_logging;
pub use models::{CellValue, ColumnKind, ColumnRule, OrderKey, Page, Row, RowKey, RowUpdate};
pub use page::{PageResult, PageStats, process_page};
pub use runner::{RunAborted, RunController, RunReport, TableCheck, TableReport, TableStatus};

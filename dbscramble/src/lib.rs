//! Library module for dbscramble
//!
//! This module exposes the CLI definition and the report rendering for
//! testing purposes. The main binary functionality is in main.rs.

use clap::{Args, Parser, Subcommand};
use dbscramble_core::{
    CommitMode, ConnectionConfig, RunOptions, RunReport, ScrambleError, SparseSlotPolicy,
    TableCheck, TableStatus,
};
use std::fmt::Write as _;
use std::path::PathBuf;

/// CLI argument structure
#[derive(Debug, Parser)]
#[command(name = "dbscramble")]
#[command(about = "Restartable in-place PII shuffler")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = "
dbscramble - in-place anonymization by permutation

Values of the configured columns are permuted across the rows of each page,
so every column keeps its values while rows lose them. Emails and full names
are split into tokens that move independently; correlated columns (an address)
move together. Progress is checkpointed after every committed page, so an
interrupted run resumes where it stopped.

SUPPORTED DATABASES:
- PostgreSQL (postgres://)
- SQLite (sqlite:// or .db/.sqlite files)

EXAMPLES:
  dbscramble --catalog tables.csv --plan plan.json run
  dbscramble --plan plan.json check
  dbscramble --checkpoint run.checkpoint status
")]
pub struct Cli {
    /// Logging options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// What to anonymize and where
    #[command(flatten)]
    pub target: TargetArgs,

    /// How pages are shuffled and committed
    #[command(flatten)]
    pub tuning: TuningArgs,

    /// Subcommand to execute, `run` when omitted
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Anonymize every cataloged table, resuming from the checkpoint
    Run,
    /// Show the current checkpoint
    Status,
    /// Delete the checkpoint so the next run starts from the first table
    Reset,
    /// Validate the plan against the catalog and the live schema
    Check,
    /// Test the database connection
    Test,
    /// List supported database types
    List,
}

/// Logging flags
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all output except errors")]
    pub quiet: bool,

    /// Log file
    #[arg(long, global = true, value_name = "FILE", help = "Append logs to FILE instead of stderr")]
    pub log_file: Option<PathBuf>,
}

/// Database and input files
#[derive(Debug, Args)]
pub struct TargetArgs {
    /// Database connection URL
    #[arg(
        long,
        global = true,
        env = "DATABASE_URL",
        help = "Database connection string (credentials will be sanitized in logs)"
    )]
    pub database_url: Option<String>,

    /// PostgreSQL schema
    #[arg(long, global = true, default_value = "public")]
    pub schema: String,

    /// Ordered table list
    #[arg(long, global = true, value_name = "FILE", default_value = "tables.csv")]
    pub catalog: PathBuf,

    /// Anonymization plan
    #[arg(long, global = true, value_name = "FILE", default_value = "plan.json")]
    pub plan: PathBuf,

    /// Checkpoint file
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        default_value = "dbscramble.checkpoint"
    )]
    pub checkpoint: PathBuf,

    /// Run report
    #[arg(long, global = true, value_name = "FILE", help = "Write the run report as JSON to FILE")]
    pub report: Option<PathBuf>,
}

/// Paging and shuffling knobs
#[derive(Debug, Args)]
pub struct TuningArgs {
    /// Rows per page
    #[arg(long, global = true, default_value_t = 500_000)]
    pub page_size: u64,

    /// Draws per row before accepting a conflicting source
    #[arg(long, global = true, default_value_t = 5)]
    pub max_attempts: usize,

    /// per-row or all-or-nothing
    #[arg(long, global = true, default_value = "per-row")]
    pub commit_mode: CommitMode,

    /// shuffle-all, present-only or skip-sparse
    #[arg(long, global = true, default_value = "shuffle-all")]
    pub sparse_slots: SparseSlotPolicy,

    /// NULL ratio above which skip-sparse leaves a slot in place
    #[arg(long, global = true, default_value_t = 0.5)]
    pub sparse_null_ratio: f64,
}

impl TuningArgs {
    /// Builds validated run options.
    ///
    /// # Errors
    /// Returns a configuration error for out-of-range values
    pub fn run_options(&self) -> Result<RunOptions, ScrambleError> {
        let options = RunOptions::new()
            .with_page_size(self.page_size)
            .with_max_attempts(self.max_attempts)
            .with_commit_mode(self.commit_mode)
            .with_sparse_slots(self.sparse_slots)
            .with_sparse_null_ratio(self.sparse_null_ratio);
        options.validate()?;
        Ok(options)
    }
}

impl TargetArgs {
    /// Connection settings for the store.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new().with_schema(self.schema.clone())
    }

    /// The database URL, required by every command that opens a store.
    ///
    /// # Errors
    /// Returns a configuration error when neither `--database-url` nor
    /// `DATABASE_URL` is set
    pub fn require_database_url(&self) -> Result<&str, ScrambleError> {
        self.database_url.as_deref().ok_or_else(|| {
            ScrambleError::configuration(
                "Database URL is required. Set DATABASE_URL or pass --database-url.",
            )
        })
    }
}

impl Cli {
    /// The command to execute; `run` when none was given.
    pub fn selected_command(&self) -> Command {
        self.command.unwrap_or(Command::Run)
    }
}

/// Renders a run report as a table for the terminal.
pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Run {}", report.run_id);
    let _ = writeln!(
        out,
        "{:<32} {:<13} {:>10} {:>6} {:>9} {:>9} {:>9}",
        "TABLE", "STATUS", "ROWS", "PAGES", "REJECTED", "FALLBACK", "SECONDS"
    );
    for table in &report.tables {
        let _ = writeln!(
            out,
            "{:<32} {:<13} {:>10} {:>6} {:>9} {:>9} {:>9.1}",
            table.table,
            table.status.to_string(),
            table.rows,
            table.pages,
            table.rejected,
            table.fallbacks,
            table.elapsed_secs()
        );
        if let Some(note) = &table.note
            && table.status == TableStatus::Skipped
        {
            let _ = writeln!(out, "    skipped: {}", note);
        }
        if !table.dropped.is_empty() {
            let _ = writeln!(out, "    dropped: {}", table.dropped.join(", "));
        }
    }
    let _ = writeln!(
        out,
        "Completed: {}  Skipped: {}  Already done: {}  Rows: {}  Rejected: {}",
        report.count(TableStatus::Completed),
        report.count(TableStatus::Skipped),
        report.count(TableStatus::AlreadyDone),
        report.total_rows(),
        report.total_rejected()
    );
    out
}

/// Renders the result of `check`; returns the text and whether every planned
/// table passed.
pub fn render_checks(checks: &[TableCheck]) -> (String, bool) {
    let mut out = String::new();
    let mut ok = true;
    for check in checks {
        match (&check.problem, check.planned) {
            (_, false) => {
                let _ = writeln!(out, "-  {} (no plan)", check.table);
            }
            (None, true) => {
                let _ = writeln!(out, "ok {}", check.table);
            }
            (Some(problem), true) => {
                ok = false;
                let _ = writeln!(out, "!! {}: {}", check.table, problem);
            }
        }
    }
    (out, ok)
}

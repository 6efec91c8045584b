//! Checkpointed run controller.
//!
//! Walks the catalog in order and drives the page processor over every
//! planned table. Progress is a single `(table, offset)` checkpoint written
//! after each committed page, so a restart resumes at the first page whose
//! commit was not recorded:
//! - tables before the checkpointed one are reported `AlreadyDone`
//! - the checkpointed table restarts at the recorded offset
//! - later tables start at 0
//!
//! Finishing a table moves the checkpoint to `(next table, 0)`; finishing the
//! last one clears it.

use crate::adapters::TableStore;
use crate::catalog::{CatalogEntry, TableCatalog};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::{AnonymizationPlan, RunOptions, TablePlan};
use crate::error::ScrambleError;
use crate::models::OrderKey;
use crate::page::process_page;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How a table ended in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableStatus {
    /// Every page committed
    Completed,
    /// Not processed: no plan, or missing table/column tolerated by the plan
    Skipped,
    /// Finished by an earlier run
    AlreadyDone,
    /// Stopped by an error; the checkpoint points into this table
    Failed,
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TableStatus::Completed => "completed",
            TableStatus::Skipped => "skipped",
            TableStatus::AlreadyDone => "already done",
            TableStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableReport {
    pub table: String,
    /// `Failed` until the table finishes
    pub status: TableStatus,
    /// Offset the table was entered at
    pub start_offset: u64,
    /// Rows read and shuffled in this run
    pub rows: u64,
    /// Pages committed in this run
    pub pages: u64,
    /// Row updates refused by the store
    pub rejected: u64,
    /// Row draws that fell back after exhausting their attempts
    pub fallbacks: u64,
    /// Values left unchanged because they did not fit their kind
    pub malformed: u64,
    /// Columns dropped before paging
    pub dropped: Vec<String>,
    /// Why the table was skipped
    pub note: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TableReport {
    fn new(table: &str, start_offset: u64) -> Self {
        let now = Utc::now();
        Self {
            table: table.to_string(),
            status: TableStatus::Failed,
            start_offset,
            rows: 0,
            pages: 0,
            rejected: 0,
            fallbacks: 0,
            malformed: 0,
            dropped: Vec::new(),
            note: None,
            started_at: now,
            finished_at: now,
        }
    }

    fn finish(&mut self, status: TableStatus) {
        self.status = status;
        self.finished_at = Utc::now();
    }

    fn skip(&mut self, note: impl Into<String>) {
        self.note = Some(note.into());
        self.finish(TableStatus::Skipped);
    }

    /// Wall-clock seconds spent on the table.
    pub fn elapsed_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Tables in catalog order, up to the one the run stopped at
    pub tables: Vec<TableReport>,
}

impl RunReport {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            tables: Vec::new(),
        }
    }

    /// Report of one table.
    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    /// Tables with the given status.
    pub fn count(&self, status: TableStatus) -> usize {
        self.tables.iter().filter(|t| t.status == status).count()
    }

    /// Rows shuffled in this run across all tables.
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }

    /// Row updates refused across all tables.
    pub fn total_rejected(&self) -> u64 {
        self.tables.iter().map(|t| t.rejected).sum()
    }
}

/// A run that stopped before the end of the catalog.
///
/// The report covers every table up to and including the failed one; the
/// checkpoint still points at the last committed page.
#[derive(Debug, Error)]
#[error("Anonymization run aborted")]
pub struct RunAborted {
    pub report: Box<RunReport>,
    #[source]
    pub error: ScrambleError,
}

/// How a planned table is read and keyed.
#[derive(Debug, Clone, PartialEq)]
pub struct TableLayout {
    /// Stable page order; also the row key of every update
    pub order_key: OrderKey,
    /// Key columns followed by every rewritten column
    pub read_columns: Vec<String>,
    /// Planned drops still present in the table
    pub droppable: Vec<String>,
}

/// Result of checking one cataloged table without writing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCheck {
    pub table: String,
    pub planned: bool,
    /// Problem that would stop or skip the table
    pub problem: Option<String>,
}

/// Works out the order key and columns of a table from its live columns.
///
/// The primary key is the first column left after the planned drops; audit
/// tables add their revision column.
///
/// # Errors
/// Returns `MissingColumn` for a configured column the table lacks, or a
/// configuration error when a key column would be anonymized
pub fn resolve_layout(
    table: &str,
    plan: &TablePlan,
    columns: &[String],
    options: &RunOptions,
) -> crate::Result<TableLayout> {
    let droppable: Vec<String> = plan
        .drop_columns
        .iter()
        .filter(|c| columns.contains(c))
        .cloned()
        .collect();
    let remaining: Vec<&String> = columns.iter().filter(|c| !droppable.contains(c)).collect();

    let primary = remaining
        .first()
        .ok_or_else(|| ScrambleError::configuration(format!("table '{}' has no columns left", table)))?;

    let revision = plan.revision_column.clone().or_else(|| {
        options
            .is_audit_table(table)
            .then(|| options.audit_revision_column.clone())
    });

    let order_key = match revision {
        Some(revision) => {
            if !remaining.contains(&&revision) {
                return Err(ScrambleError::missing_column(table, revision));
            }
            OrderKey::with_revision(primary.as_str(), revision)
        }
        None => OrderKey::primary(primary.as_str()),
    };

    let mut read_columns = order_key.columns.clone();
    for column in plan.rewritten_columns() {
        if order_key.columns.iter().any(|k| k == column) {
            return Err(ScrambleError::configuration(format!(
                "key column '{}' of table '{}' cannot be anonymized",
                column, table
            )));
        }
        if !remaining.iter().any(|c| c.as_str() == column) {
            return Err(ScrambleError::missing_column(table, column));
        }
        read_columns.push(column.to_string());
    }

    Ok(TableLayout {
        order_key,
        read_columns,
        droppable,
    })
}

/// Drives a run over a catalog.
pub struct RunController<'a> {
    store: &'a dyn TableStore,
    checkpoints: &'a dyn CheckpointStore,
    catalog: &'a TableCatalog,
    plan: &'a AnonymizationPlan,
    options: RunOptions,
}

impl std::fmt::Debug for RunController<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("store", &self.store.store_type())
            .field("tables", &self.catalog.len())
            .field("options", &self.options)
            .finish()
    }
}

impl<'a> RunController<'a> {
    /// Creates a controller with default run options.
    pub fn new(
        store: &'a dyn TableStore,
        checkpoints: &'a dyn CheckpointStore,
        catalog: &'a TableCatalog,
        plan: &'a AnonymizationPlan,
    ) -> Self {
        Self {
            store,
            checkpoints,
            catalog,
            plan,
            options: RunOptions::default(),
        }
    }

    /// Builder method to set run options.
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Current run options.
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Runs the catalog from the persisted checkpoint to the end.
    ///
    /// # Errors
    /// Returns [`RunAborted`] on a stale checkpoint, a failed page commit or
    /// checkpoint write, or a schema failure the table's plan does not
    /// tolerate. Tables after the failing one are not touched.
    pub async fn run<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<RunReport, RunAborted> {
        let mut report = RunReport::new();

        info!(
            run_id = %report.run_id,
            tables = self.catalog.len(),
            page_size = self.options.page_size,
            "Starting anonymization run"
        );

        let resume = match self.resume_point().await {
            Ok(resume) => resume,
            Err(error) => return Err(abort(report, error)),
        };

        for entry in self.catalog.entries() {
            let start_offset = match resume {
                Some((position, _)) if entry.position < position => {
                    let mut done = TableReport::new(&entry.name, 0);
                    done.finish(TableStatus::AlreadyDone);
                    debug!(table = %entry.name, "Table finished in an earlier run");
                    report.tables.push(done);
                    continue;
                }
                Some((position, offset)) if entry.position == position => offset,
                _ => 0,
            };

            let mut table_report = TableReport::new(&entry.name, start_offset);
            let outcome = match self.process_table(entry, &mut table_report, rng).await {
                Ok(()) => self.advance_past(entry).await,
                Err(error) => Err(error),
            };
            log_table_summary(&table_report);

            if let Err(error) = outcome {
                error!(table = %entry.name, error = %error, "Run stopped");
                report.tables.push(table_report);
                return Err(abort(report, error));
            }
            report.tables.push(table_report);
        }

        report.finished_at = Utc::now();
        info!(
            run_id = %report.run_id,
            completed = report.count(TableStatus::Completed),
            skipped = report.count(TableStatus::Skipped),
            already_done = report.count(TableStatus::AlreadyDone),
            rows = report.total_rows(),
            "Anonymization run finished"
        );
        Ok(report)
    }

    /// Validates every planned table against the live schema without
    /// writing anything.
    ///
    /// # Errors
    /// Returns error only for failures unrelated to a single table, such as
    /// an invalid plan or run options
    pub async fn check(&self) -> crate::Result<Vec<TableCheck>> {
        self.options.validate()?;
        self.plan.validate()?;

        let mut checks = Vec::with_capacity(self.catalog.len());
        for entry in self.catalog.entries() {
            let Some(plan) = self.plan.plan_for(&entry.name, &self.options.audit_suffix) else {
                checks.push(TableCheck {
                    table: entry.name.clone(),
                    planned: false,
                    problem: None,
                });
                continue;
            };

            let problem = match self.store.columns(&entry.name).await {
                Ok(columns) => resolve_layout(&entry.name, plan, &columns, &self.options)
                    .err()
                    .map(|e| e.to_string()),
                Err(e) => Some(e.to_string()),
            };
            checks.push(TableCheck {
                table: entry.name.clone(),
                planned: true,
                problem,
            });
        }
        Ok(checks)
    }

    async fn resume_point(&self) -> crate::Result<Option<(usize, u64)>> {
        self.options.validate()?;
        self.plan.validate()?;

        let Some(checkpoint) = self.checkpoints.load().await? else {
            return Ok(None);
        };
        let position = self
            .catalog
            .position(&checkpoint.table)
            .ok_or_else(|| ScrambleError::StaleCheckpoint {
                table: checkpoint.table.clone(),
            })?;

        info!(checkpoint = %checkpoint, "Resuming from checkpoint");
        Ok(Some((position, checkpoint.offset)))
    }

    async fn advance_past(&self, entry: &CatalogEntry) -> crate::Result<()> {
        match self.catalog.next_after(entry.position) {
            Some(next) => self.checkpoints.save(&Checkpoint::new(&next.name, 0)).await,
            None => self.checkpoints.clear().await,
        }
    }

    async fn process_table<R: Rng + ?Sized>(
        &self,
        entry: &CatalogEntry,
        report: &mut TableReport,
        rng: &mut R,
    ) -> crate::Result<()> {
        let table = entry.name.as_str();
        let Some(plan) = self.plan.plan_for(table, &self.options.audit_suffix) else {
            debug!(table = %table, "No plan for table");
            report.skip("no plan");
            return Ok(());
        };

        let layout = match self.store.columns(table).await.and_then(|columns| {
            resolve_layout(table, plan, &columns, &self.options)
        }) {
            Ok(layout) => layout,
            Err(e) if e.is_schema_failure() && plan.skip_if_missing => {
                warn!(table = %table, error = %e, "Skipping table");
                report.skip(e.to_string());
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for column in &layout.droppable {
            match self.store.drop_column(table, column).await {
                Ok(()) => {
                    info!(table = %table, column = %column, "Dropped column");
                    report.dropped.push(column.clone());
                }
                Err(e) => warn!(table = %table, column = %column, error = %e, "Failed to drop column"),
            }
        }

        if plan.has_page_work() {
            self.process_pages(table, plan, &layout, report, rng).await?;
        }

        report.finish(TableStatus::Completed);
        Ok(())
    }

    async fn process_pages<R: Rng + ?Sized>(
        &self,
        table: &str,
        plan: &TablePlan,
        layout: &TableLayout,
        report: &mut TableReport,
        rng: &mut R,
    ) -> crate::Result<()> {
        let mut offset = report.start_offset;

        loop {
            let page = self
                .store
                .read_page(
                    table,
                    &layout.order_key,
                    &layout.read_columns,
                    self.options.page_size,
                    offset,
                )
                .await?;
            if page.is_empty() {
                return Ok(());
            }

            let result = process_page(
                table,
                &page,
                plan,
                &layout.order_key.columns,
                &self.options,
                rng,
            )?;

            let outcome = self
                .store
                .apply_updates(table, &result.updates, self.options.commit_mode)
                .await
                .map_err(|e| ScrambleError::page_commit(table, offset, e))?;

            for rejection in &outcome.rejected {
                warn!(
                    table = %table,
                    key = %rejection.key,
                    reason = %rejection.reason,
                    "Row update rejected"
                );
            }

            // The checkpoint only moves after the commit above succeeded.
            offset = offset.saturating_add(page.len() as u64);
            self.checkpoints.save(&Checkpoint::new(table, offset)).await?;

            report.rows = report.rows.saturating_add(page.len() as u64);
            report.pages = report.pages.saturating_add(1);
            report.rejected = report.rejected.saturating_add(outcome.rejected.len() as u64);
            report.fallbacks = report.fallbacks.saturating_add(result.stats.fallbacks as u64);
            report.malformed = report
                .malformed
                .saturating_add(result.stats.malformed_values as u64);

            info!(
                table = %table,
                offset,
                rows = page.len(),
                applied = outcome.applied,
                rejected = outcome.rejected.len(),
                fallbacks = result.stats.fallbacks,
                "Page committed"
            );
        }
    }
}

fn abort(mut report: RunReport, error: ScrambleError) -> RunAborted {
    report.finished_at = Utc::now();
    RunAborted {
        report: Box::new(report),
        error,
    }
}

fn log_table_summary(report: &TableReport) {
    info!(
        table = %report.table,
        status = %report.status,
        rows = report.rows,
        pages = report.pages,
        rejected = report.rejected,
        fallbacks = report.fallbacks,
        elapsed_secs = report.elapsed_secs(),
        started_at = %report.started_at.format("%Y-%m-%d %H:%M:%S"),
        finished_at = %report.finished_at.format("%Y-%m-%d %H:%M:%S"),
        "Table finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::checkpoint::{CheckpointWrite, MemoryCheckpointStore};
    use crate::models::{CellValue, ColumnKind};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn users(rows: i64) -> Vec<Vec<CellValue>> {
        (0..rows)
            .map(|i| vec![CellValue::Integer(i), format!("user{}@x.com", i).into()])
            .collect()
    }

    fn plan_for(tables: &[&str]) -> AnonymizationPlan {
        tables.iter().fold(AnonymizationPlan::new(), |plan, table| {
            plan.with_table(*table, TablePlan::new().column("email", ColumnKind::Opaque))
        })
    }

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|c| (*c).to_string()).collect()
    }

    #[test]
    fn test_layout_uses_first_column_as_key() {
        let plan = TablePlan::new()
            .drop_column("legacy_id")
            .column("email", ColumnKind::Email);
        let layout = resolve_layout(
            "cor_users",
            &plan,
            &columns(&["legacy_id", "id", "email"]),
            &RunOptions::default(),
        )
        .unwrap();

        assert_eq!(layout.order_key, OrderKey::primary("id"));
        assert_eq!(layout.read_columns, columns(&["id", "email"]));
        assert_eq!(layout.droppable, columns(&["legacy_id"]));
    }

    #[test]
    fn test_layout_audit_table_adds_revision() {
        let plan = TablePlan::new().column("email", ColumnKind::Email);
        let layout = resolve_layout(
            "cor_users_aud",
            &plan,
            &columns(&["id", "rev_ver", "email"]),
            &RunOptions::default(),
        )
        .unwrap();
        assert_eq!(layout.order_key, OrderKey::with_revision("id", "rev_ver"));

        let missing = resolve_layout(
            "cor_users_aud",
            &plan,
            &columns(&["id", "email"]),
            &RunOptions::default(),
        );
        assert!(matches!(missing, Err(ScrambleError::MissingColumn { .. })));
    }

    #[test]
    fn test_layout_rejects_anonymized_key() {
        let plan = TablePlan::new().column("id", ColumnKind::Opaque);
        let result = resolve_layout("t", &plan, &columns(&["id", "email"]), &RunOptions::default());
        assert!(matches!(result, Err(ScrambleError::Configuration { .. })));
    }

    #[test]
    fn test_layout_reports_missing_column() {
        let plan = TablePlan::new().group("address", &["street", "city"]);
        let result = resolve_layout("t", &plan, &columns(&["id", "street"]), &RunOptions::default());
        assert!(matches!(
            result,
            Err(ScrambleError::MissingColumn { ref column, .. }) if column == "city"
        ));
    }

    #[tokio::test]
    async fn test_resume_skips_done_tables_and_restarts_later_ones() {
        let store = MemoryStore::new()
            .with_table("a", &["id", "email"], users(4))
            .with_table("b", &["id", "email"], users(10))
            .with_table("c", &["id", "email"], users(4));
        let catalog = TableCatalog::from_names(["a", "b", "c"]).unwrap();
        let plan = plan_for(&["a", "b", "c"]);
        let checkpoints = MemoryCheckpointStore::with_checkpoint(Checkpoint::new("b", 6));
        let controller = RunController::new(&store, &checkpoints, &catalog, &plan)
            .with_options(RunOptions::new().with_page_size(3));
        let mut rng = StdRng::seed_from_u64(1);

        let report = controller.run(&mut rng).await.unwrap();

        assert_eq!(report.table("a").unwrap().status, TableStatus::AlreadyDone);
        assert_eq!(report.table("b").unwrap().start_offset, 6);
        assert_eq!(report.table("b").unwrap().rows, 4);
        assert_eq!(report.table("c").unwrap().start_offset, 0);
        assert_eq!(report.table("c").unwrap().rows, 4);

        let reads = store.reads();
        assert!(reads.iter().all(|(table, _)| table != "a"));
        assert_eq!(reads.iter().find(|(t, _)| t == "b").unwrap().1, 6);
        assert_eq!(reads.iter().find(|(t, _)| t == "c").unwrap().1, 0);
        assert_eq!(checkpoints.current(), None);
    }

    #[tokio::test]
    async fn test_checkpoint_follows_committed_rows() {
        let store = MemoryStore::new().with_table("a", &["id", "email"], users(5));
        let catalog = TableCatalog::from_names(["a", "b"]).unwrap();
        let plan = plan_for(&["a"]);
        let checkpoints = MemoryCheckpointStore::new();
        let controller = RunController::new(&store, &checkpoints, &catalog, &plan)
            .with_options(RunOptions::new().with_page_size(2));
        let mut rng = StdRng::seed_from_u64(2);

        let report = controller.run(&mut rng).await.unwrap();
        assert_eq!(report.table("b").unwrap().status, TableStatus::Skipped);

        assert_eq!(
            checkpoints.writes(),
            vec![
                CheckpointWrite::Saved(Checkpoint::new("a", 2)),
                CheckpointWrite::Saved(Checkpoint::new("a", 4)),
                CheckpointWrite::Saved(Checkpoint::new("a", 5)),
                CheckpointWrite::Saved(Checkpoint::new("b", 0)),
                CheckpointWrite::Cleared,
            ]
        );
    }

    #[tokio::test]
    async fn test_stale_checkpoint_aborts_before_any_read() {
        let store = MemoryStore::new().with_table("a", &["id", "email"], users(3));
        let catalog = TableCatalog::from_names(["a"]).unwrap();
        let plan = plan_for(&["a"]);
        let checkpoints = MemoryCheckpointStore::with_checkpoint(Checkpoint::new("gone", 10));
        let controller = RunController::new(&store, &checkpoints, &catalog, &plan);
        let mut rng = StdRng::seed_from_u64(3);

        let aborted = controller.run(&mut rng).await.unwrap_err();
        assert!(matches!(aborted.error, ScrambleError::StaleCheckpoint { .. }));
        assert!(aborted.report.tables.is_empty());
        assert!(store.reads().is_empty());
    }

    #[tokio::test]
    async fn test_check_reports_problems_without_writing() {
        let store = MemoryStore::new()
            .with_table("a", &["id", "email"], users(3))
            .with_table("b", &["id"], vec![vec![CellValue::Integer(1)]]);
        let catalog = TableCatalog::from_names(["a", "b", "c"]).unwrap();
        let plan = plan_for(&["a", "b"]);
        let checkpoints = MemoryCheckpointStore::new();
        let controller = RunController::new(&store, &checkpoints, &catalog, &plan);

        let checks = controller.check().await.unwrap();
        assert_eq!(checks.len(), 3);
        assert!(checks[0].planned && checks[0].problem.is_none());
        assert!(checks[1].problem.as_deref().unwrap().contains("email"));
        assert!(!checks[2].planned);
        assert_eq!(store.commits(), 0);
        assert!(checkpoints.writes().is_empty());
    }
}

//! In-process store.
//!
//! Holds tables as plain rows behind a mutex and implements every store
//! capability with the same contracts as the SQL stores. Failures can be
//! injected per row, per commit and per column drop, which is how the
//! pipeline's crash and rejection paths are exercised.

use super::{RowRejection, SchemaProbe, StoreType, TableReader, TableWriter, WriteOutcome};
use crate::config::CommitMode;
use crate::error::{ScrambleError, StoreFault};
use crate::models::{CellValue, OrderKey, Page, Row, RowKey, RowUpdate};
use crate::Result;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn column_index(&self, table: &str, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| ScrambleError::missing_column(table, column))
    }

    fn find_row(&self, key: &RowKey) -> Option<usize> {
        let positions: Vec<(usize, &CellValue)> = key
            .parts
            .iter()
            .map(|(column, value)| {
                self.columns
                    .iter()
                    .position(|c| c == column)
                    .map(|index| (index, value))
            })
            .collect::<Option<_>>()?;

        self.rows.iter().position(|row| {
            positions
                .iter()
                .all(|(index, value)| row.get(*index) == *value)
        })
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    rejected_keys: Vec<(String, RowKey)>,
    failing_drops: Vec<(String, String)>,
    fail_commit_at: Option<u64>,
    commits: u64,
    reads: Vec<(String, u64)>,
}

/// Tables held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

/// Total order over cells used to sort rows: NULL first, then numbers, text,
/// booleans and blobs.
pub fn compare_cells(a: &CellValue, b: &CellValue) -> Ordering {
    fn rank(value: &CellValue) -> u8 {
        match value {
            CellValue::Null => 0,
            CellValue::Integer(_) | CellValue::Real(_) => 1,
            CellValue::Text(_) => 2,
            CellValue::Boolean(_) => 3,
            CellValue::Blob(_) => 4,
        }
    }

    match (a, b) {
        (CellValue::Integer(x), CellValue::Integer(y)) => x.cmp(y),
        (CellValue::Integer(x), CellValue::Real(y)) => (*x as f64).total_cmp(y),
        (CellValue::Real(x), CellValue::Integer(y)) => x.total_cmp(&(*y as f64)),
        (CellValue::Real(x), CellValue::Real(y)) => x.total_cmp(y),
        (CellValue::Text(x), CellValue::Text(y)) => x.cmp(y),
        (CellValue::Boolean(x), CellValue::Boolean(y)) => x.cmp(y),
        (CellValue::Blob(x), CellValue::Blob(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to add a table.
    pub fn with_table(self, table: &str, columns: &[&str], rows: Vec<Vec<CellValue>>) -> Self {
        self.insert_table(table, columns, rows);
        self
    }

    /// Adds or replaces a table.
    pub fn insert_table(&self, table: &str, columns: &[&str], rows: Vec<Vec<CellValue>>) {
        let table_data = MemoryTable {
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            rows: rows.into_iter().map(Row::new).collect(),
        };
        self.lock().tables.insert(table.to_string(), table_data);
    }

    /// Current rows of a table, in insertion order.
    pub fn rows(&self, table: &str) -> Option<Vec<Row>> {
        self.lock().tables.get(table).map(|t| t.rows.clone())
    }

    /// Current values of one column, in insertion order.
    pub fn column_values(&self, table: &str, column: &str) -> Option<Vec<CellValue>> {
        let state = self.lock();
        let data = state.tables.get(table)?;
        let index = data.columns.iter().position(|c| c == column)?;
        Some(data.rows.iter().map(|row| row.get(index).clone()).collect())
    }

    /// Makes every future update of the row with `key` fail.
    pub fn reject_row(&self, table: &str, key: RowKey) {
        self.lock().rejected_keys.push((table.to_string(), key));
    }

    /// Makes dropping `column` from `table` fail.
    pub fn fail_drop(&self, table: &str, column: &str) {
        self.lock()
            .failing_drops
            .push((table.to_string(), column.to_string()));
    }

    /// Makes the n-th commit from now (1-based) fail without applying
    /// anything.
    pub fn fail_commit_at(&self, n: u64) {
        let mut state = self.lock();
        state.fail_commit_at = Some(state.commits.saturating_add(n));
    }

    /// Number of `apply_updates` calls so far, failed ones included.
    pub fn commits(&self) -> u64 {
        self.lock().commits
    }

    /// Every `(table, offset)` read so far.
    pub fn reads(&self) -> Vec<(String, u64)> {
        self.lock().reads.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SchemaProbe for MemoryStore {
    async fn columns(&self, table: &str) -> Result<Vec<String>> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| ScrambleError::missing_table(table))
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    fn store_type(&self) -> StoreType {
        StoreType::Memory
    }
}

#[async_trait]
impl TableReader for MemoryStore {
    async fn read_page(
        &self,
        table: &str,
        order_key: &OrderKey,
        columns: &[String],
        page_size: u64,
        offset: u64,
    ) -> Result<Page> {
        let mut state = self.lock();
        state.reads.push((table.to_string(), offset));

        let data = state
            .tables
            .get(table)
            .ok_or_else(|| ScrambleError::missing_table(table))?;

        let key_indexes = order_key
            .columns
            .iter()
            .map(|c| data.column_index(table, c))
            .collect::<Result<Vec<_>>>()?;
        let selected = columns
            .iter()
            .map(|c| data.column_index(table, c))
            .collect::<Result<Vec<_>>>()?;

        let mut ordered: Vec<&Row> = data.rows.iter().collect();
        ordered.sort_by(|a, b| {
            key_indexes
                .iter()
                .map(|&i| compare_cells(a.get(i), b.get(i)))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let take = usize::try_from(page_size).unwrap_or(usize::MAX);
        let rows = ordered
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|row| Row::new(selected.iter().map(|&i| row.get(i).clone()).collect()))
            .collect();

        Ok(Page::new(columns.to_vec(), rows))
    }
}

#[async_trait]
impl TableWriter for MemoryStore {
    async fn apply_updates(
        &self,
        table: &str,
        updates: &[RowUpdate],
        mode: CommitMode,
    ) -> Result<WriteOutcome> {
        let mut state = self.lock();
        state.commits = state.commits.saturating_add(1);
        if state.fail_commit_at == Some(state.commits) {
            state.fail_commit_at = None;
            return Err(ScrambleError::query_failed(
                format!("Commit on table '{}' failed", table),
                StoreFault("injected commit failure".to_string()),
            ));
        }

        let rejected_keys: Vec<RowKey> = state
            .rejected_keys
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, key)| key.clone())
            .collect();

        let data = state
            .tables
            .get_mut(table)
            .ok_or_else(|| ScrambleError::missing_table(table))?;

        // Stage every write first so all-or-nothing can abort cleanly.
        let mut staged = Vec::with_capacity(updates.len());
        let mut outcome = WriteOutcome::default();

        for update in updates {
            let target = if rejected_keys.contains(&update.key) {
                Err("row update rejected by constraint".to_string())
            } else {
                data.find_row(&update.key)
                    .ok_or_else(|| "no row matches key".to_string())
                    .and_then(|row| {
                        update
                            .assignments
                            .iter()
                            .map(|(column, value)| {
                                data.column_index(table, column)
                                    .map(|index| (index, value.clone()))
                                    .map_err(|e| e.to_string())
                            })
                            .collect::<std::result::Result<Vec<_>, String>>()
                            .map(|cells| (row, cells))
                    })
            };

            match target {
                Ok(write) => staged.push(write),
                Err(reason) => {
                    if mode == CommitMode::AllOrNothing {
                        return Err(ScrambleError::query_failed(
                            format!("Update of row {} in '{}' rejected", update.key, table),
                            StoreFault(reason),
                        ));
                    }
                    outcome.rejected.push(RowRejection {
                        key: update.key.clone(),
                        reason,
                    });
                }
            }
        }

        for (row, cells) in staged {
            if let Some(target) = data.rows.get_mut(row) {
                for (index, value) in cells {
                    if let Some(cell) = target.values.get_mut(index) {
                        *cell = value;
                    }
                }
                outcome.applied = outcome.applied.saturating_add(1);
            }
        }

        Ok(outcome)
    }

    async fn drop_column(&self, table: &str, column: &str) -> Result<()> {
        let mut state = self.lock();
        if state
            .failing_drops
            .iter()
            .any(|(t, c)| t == table && c == column)
        {
            return Err(ScrambleError::query_failed(
                format!("Failed to drop column '{}' from '{}'", column, table),
                StoreFault("injected drop failure".to_string()),
            ));
        }

        let data = state
            .tables
            .get_mut(table)
            .ok_or_else(|| ScrambleError::missing_table(table))?;
        let index = data.column_index(table, column)?;
        data.columns.remove(index);
        for row in &mut data.rows {
            if index < row.values.len() {
                row.values.remove(index);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: i64) -> RowKey {
        RowKey {
            parts: vec![("id".to_string(), CellValue::Integer(id))],
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::new().with_table(
            "cor_users",
            &["id", "email"],
            vec![
                vec![CellValue::Integer(3), "c@x.com".into()],
                vec![CellValue::Integer(1), "a@x.com".into()],
                vec![CellValue::Integer(2), "b@x.com".into()],
            ],
        )
    }

    fn update(id: i64, email: &str) -> RowUpdate {
        RowUpdate {
            key: key(id),
            assignments: vec![("email".to_string(), email.into())],
        }
    }

    #[tokio::test]
    async fn test_read_page_orders_and_pages() {
        let store = store();
        let columns = vec!["id".to_string(), "email".to_string()];
        let order = OrderKey::primary("id");

        let first = store.read_page("cor_users", &order, &columns, 2, 0).await.unwrap();
        let ids: Vec<&CellValue> = first.rows.iter().map(|r| r.get(0)).collect();
        assert_eq!(ids, vec![&CellValue::Integer(1), &CellValue::Integer(2)]);

        let second = store.read_page("cor_users", &order, &columns, 2, 2).await.unwrap();
        assert_eq!(second.len(), 1);

        let end = store.read_page("cor_users", &order, &columns, 2, 3).await.unwrap();
        assert!(end.is_empty());
        assert_eq!(store.reads().len(), 3);
    }

    #[tokio::test]
    async fn test_read_missing_table_or_column() {
        let store = store();
        let order = OrderKey::primary("id");
        let missing_table = store
            .read_page("nope", &order, &["id".to_string()], 10, 0)
            .await;
        assert!(matches!(missing_table, Err(ScrambleError::MissingTable { .. })));

        let missing_column = store
            .read_page("cor_users", &order, &["phone".to_string()], 10, 0)
            .await;
        assert!(matches!(missing_column, Err(ScrambleError::MissingColumn { .. })));
    }

    #[tokio::test]
    async fn test_per_row_rejection_is_reported() {
        let store = store();
        store.reject_row("cor_users", key(2));

        let outcome = store
            .apply_updates(
                "cor_users",
                &[update(1, "z@x.com"), update(2, "y@x.com"), update(9, "w@x.com")],
                CommitMode::PerRow,
            )
            .await
            .unwrap();

        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.rejected.len(), 2);
        let emails = store.column_values("cor_users", "email").unwrap();
        assert_eq!(emails[1], CellValue::from("z@x.com"));
        assert_eq!(emails[2], CellValue::from("b@x.com"));
    }

    #[tokio::test]
    async fn test_all_or_nothing_applies_nothing_on_rejection() {
        let store = store();
        store.reject_row("cor_users", key(2));

        let result = store
            .apply_updates(
                "cor_users",
                &[update(1, "z@x.com"), update(2, "y@x.com")],
                CommitMode::AllOrNothing,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(
            store.column_values("cor_users", "email").unwrap()[1],
            CellValue::from("a@x.com")
        );
    }

    #[tokio::test]
    async fn test_injected_commit_failure() {
        let store = store();
        store.fail_commit_at(1);
        assert!(
            store
                .apply_updates("cor_users", &[update(1, "z@x.com")], CommitMode::PerRow)
                .await
                .is_err()
        );
        assert_eq!(store.commits(), 1);
        assert!(
            store
                .apply_updates("cor_users", &[update(1, "z@x.com")], CommitMode::PerRow)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_drop_column() {
        let store = store();
        store.drop_column("cor_users", "email").await.unwrap();
        assert_eq!(store.columns("cor_users").await.unwrap(), vec!["id"]);
        assert!(store.drop_column("cor_users", "email").await.is_err());

        store.fail_drop("cor_users", "id");
        assert!(store.drop_column("cor_users", "id").await.is_err());
    }

    #[test]
    fn test_compare_cells() {
        assert_eq!(compare_cells(&CellValue::Null, &CellValue::Integer(1)), Ordering::Less);
        assert_eq!(compare_cells(&CellValue::Integer(2), &CellValue::Real(1.5)), Ordering::Greater);
        assert_eq!(compare_cells(&"a".into(), &"b".into()), Ordering::Less);
    }
}

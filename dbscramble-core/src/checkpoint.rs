//! Durable run progress.
//!
//! A checkpoint is a single `(table, offset)` record: the table being worked on
//! and the number of its rows already committed. It is written only after a
//! page commit succeeds and removed when the whole catalog is done.

use crate::error::ScrambleError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

/// Resume point of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Table in progress
    pub table: String,
    /// Rows of `table` already committed
    pub offset: u64,
}

impl Checkpoint {
    /// Creates a checkpoint.
    pub fn new(table: impl Into<String>, offset: u64) -> Self {
        Self {
            table: table.into(),
            offset,
        }
    }
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}", self.table, self.offset)
    }
}

/// Storage for the checkpoint record.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Reads the checkpoint, `None` on a fresh run.
    async fn load(&self) -> crate::Result<Option<Checkpoint>>;

    /// Replaces the checkpoint so that it survives a crash once this returns.
    async fn save(&self, checkpoint: &Checkpoint) -> crate::Result<()>;

    /// Removes the checkpoint. Clearing an absent checkpoint is not an error.
    async fn clear(&self) -> crate::Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    table: String,
    offset: u64,
    updated_at: DateTime<Utc>,
}

/// Checkpoint kept in a small JSON file.
///
/// Writes go to a sibling temp file that is synced and renamed over the
/// target, so a crash leaves either the old or the new record. On Unix the
/// containing directory is synced after the rename so the new entry itself is
/// on disk. Files in the older `table,offset` text form are still read.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    /// Creates a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Directory holding the checkpoint; `.` for a bare file name.
    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    #[cfg(unix)]
    async fn sync_parent_dir(&self) -> crate::Result<()> {
        let dir = tokio::fs::File::open(self.parent_dir())
            .await
            .map_err(|e| self.io_error("open directory of", e))?;
        dir.sync_all()
            .await
            .map_err(|e| self.io_error("sync directory of", e))
    }

    #[cfg(not(unix))]
    async fn sync_parent_dir(&self) -> crate::Result<()> {
        Ok(())
    }

    fn io_error(&self, action: &str, source: std::io::Error) -> ScrambleError {
        ScrambleError::Io {
            context: format!("Failed to {} checkpoint {}", action, self.path.display()),
            source,
        }
    }
}

/// Parses checkpoint file contents in either format.
///
/// # Errors
/// Returns a configuration error if the contents are neither JSON nor
/// `table,offset`
pub fn parse_checkpoint(contents: &str) -> crate::Result<Option<Checkpoint>> {
    let contents = contents.trim();
    if contents.is_empty() {
        return Ok(None);
    }

    if contents.starts_with('{') {
        let file: CheckpointFile =
            serde_json::from_str(contents).map_err(|e| ScrambleError::Serialization {
                context: "Failed to parse checkpoint".to_string(),
                source: e,
            })?;
        return Ok(Some(Checkpoint::new(file.table, file.offset)));
    }

    let legacy = contents
        .rsplit_once(',')
        .and_then(|(table, offset)| {
            let table = table.trim();
            let offset = offset.trim().parse::<u64>().ok()?;
            (!table.is_empty()).then(|| Checkpoint::new(table, offset))
        })
        .ok_or_else(|| {
            ScrambleError::configuration(
                "checkpoint is neither JSON nor 'table,offset'; inspect it or reset the run",
            )
        })?;
    Ok(Some(legacy))
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> crate::Result<Option<Checkpoint>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => parse_checkpoint(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error("read", e)),
        }
    }

    async fn save(&self, checkpoint: &Checkpoint) -> crate::Result<()> {
        let record = CheckpointFile {
            table: checkpoint.table.clone(),
            offset: checkpoint.offset,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_vec(&record).map_err(|e| ScrambleError::Serialization {
            context: "Failed to serialize checkpoint".to_string(),
            source: e,
        })?;

        let temp = self.temp_path();
        let mut file = tokio::fs::File::create(&temp)
            .await
            .map_err(|e| self.io_error("create", e))?;
        file.write_all(&json)
            .await
            .map_err(|e| self.io_error("write", e))?;
        file.sync_all()
            .await
            .map_err(|e| self.io_error("sync", e))?;
        drop(file);

        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.io_error("replace", e))?;
        self.sync_parent_dir().await?;

        tracing::debug!(table = %checkpoint.table, offset = checkpoint.offset, "Checkpoint saved");
        Ok(())
    }

    async fn clear(&self) -> crate::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error("delete", e)),
        }
    }
}

/// One call recorded by [`MemoryCheckpointStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointWrite {
    /// `save` was called
    Saved(Checkpoint),
    /// `clear` was called
    Cleared,
}

#[derive(Debug, Default)]
struct MemoryCheckpointState {
    current: Option<Checkpoint>,
    writes: Vec<CheckpointWrite>,
    fail_save_at: Option<usize>,
    saves: usize,
}

/// In-process checkpoint store that keeps a history of every write.
///
/// `fail_save_at(n)` makes the n-th `save` (1-based) fail, which simulates a
/// crash between a page commit and its checkpoint write.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    state: Mutex<MemoryCheckpointState>,
}

impl MemoryCheckpointStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds a checkpoint.
    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        let store = Self::new();
        store.lock().current = Some(checkpoint);
        store
    }

    /// Arms a failure for the n-th save from now.
    pub fn fail_save_at(&self, n: usize) {
        let mut state = self.lock();
        state.fail_save_at = Some(state.saves.saturating_add(n));
    }

    /// Current checkpoint.
    pub fn current(&self) -> Option<Checkpoint> {
        self.lock().current.clone()
    }

    /// Every save and clear, in order.
    pub fn writes(&self) -> Vec<CheckpointWrite> {
        self.lock().writes.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryCheckpointState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> crate::Result<Option<Checkpoint>> {
        Ok(self.current())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> crate::Result<()> {
        let mut state = self.lock();
        state.saves = state.saves.saturating_add(1);
        if state.fail_save_at == Some(state.saves) {
            state.fail_save_at = None;
            return Err(ScrambleError::Io {
                context: "Injected checkpoint failure".to_string(),
                source: std::io::Error::other("checkpoint write interrupted"),
            });
        }
        state.current = Some(checkpoint.clone());
        state.writes.push(CheckpointWrite::Saved(checkpoint.clone()));
        Ok(())
    }

    async fn clear(&self) -> crate::Result<()> {
        let mut state = self.lock();
        state.current = None;
        state.writes.push(CheckpointWrite::Cleared);
        Ok(())
    }
}

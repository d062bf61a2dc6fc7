//! The persisted record of what last happened to each unit.
//!
//! [`HistoryStore`] is the seam the resolver queries for stages the live
//! cache has never seen. [`JsonHistoryStore`] is the file-backed
//! implementation: a `HistoryFile` JSON document at
//! `<home>/.statusfeed/history.json`. Writes use the atomic `.tmp` + rename
//! pattern.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use statusfeed_core::{config, ExecutionStatus, PipelineConfig, ProjectName, StageConfig, StatusEntry};

use crate::error::{io_err, SyncError};

/// File name of the history document under the statusfeed root.
pub const HISTORY_FILE: &str = "history.json";

/// Source of last-known statuses for units missing from the live cache.
pub trait HistoryStore: Send + Sync {
    /// Records for `stage` of `pipeline` and for the stage's jobs, in any
    /// order. Returned entries carry no viewers; those are applied later.
    fn statuses_for_stage_and_jobs(
        &self,
        pipeline: &PipelineConfig,
        stage: &StageConfig,
    ) -> Result<Vec<StatusEntry>, SyncError>;
}

/// A history store that knows nothing. Every unit it is asked about resolves
/// to a placeholder.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyHistory;

impl HistoryStore for EmptyHistory {
    fn statuses_for_stage_and_jobs(
        &self,
        _pipeline: &PipelineConfig,
        _stage: &StageConfig,
    ) -> Result<Vec<StatusEntry>, SyncError> {
        Ok(Vec::new())
    }
}

/// One persisted execution record. Viewers are deliberately absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryRecord {
    pub name: ProjectName,
    #[serde(flatten)]
    pub status: ExecutionStatus,
}

impl From<HistoryRecord> for StatusEntry {
    fn from(record: HistoryRecord) -> Self {
        StatusEntry::known(record.name, record.status)
    }
}

/// On-disk history payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryFile {
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub records: Vec<HistoryRecord>,
}

impl Default for HistoryFile {
    fn default() -> Self {
        Self {
            recorded_at: Utc::now(),
            records: Vec::new(),
        }
    }
}

/// `<home>/.statusfeed/history.json`
pub fn history_path_at(home: &Path) -> PathBuf {
    config::root_at(home).join(HISTORY_FILE)
}

/// Load the history document at `path`.
///
/// Returns an empty document if the file does not yet exist.
pub fn load_from(path: &Path) -> Result<HistoryFile, SyncError> {
    if !path.exists() {
        return Ok(HistoryFile::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Save the history document to `path` atomically.
///
/// Writes to `<path>.tmp` then renames to `<path>`.
pub fn save_to(path: &Path, history: &HistoryFile) -> Result<(), SyncError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid history store path"),
        ));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(history)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// History backed by a JSON file that is re-read on every lookup, so an
/// external writer's updates are picked up without a restart.
#[derive(Debug, Clone)]
pub struct JsonHistoryStore {
    path: PathBuf,
}

impl JsonHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The store at `<home>/.statusfeed/history.json`.
    pub fn at(home: &Path) -> Self {
        Self::new(history_path_at(home))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryStore for JsonHistoryStore {
    fn statuses_for_stage_and_jobs(
        &self,
        pipeline: &PipelineConfig,
        stage: &StageConfig,
    ) -> Result<Vec<StatusEntry>, SyncError> {
        let history = load_from(&self.path)?;
        Ok(history
            .records
            .into_iter()
            .filter(|record| {
                record.name.pipeline() == &pipeline.name && record.name.stage_name() == &stage.name
            })
            .map(StatusEntry::from)
            .collect())
    }
}

//! Run persistence. One complete, self-describing snapshot per run id,
//! overwritten stage by stage; there is no cross-run relational structure.

mod json_file;
mod schema;
mod sqlite;

pub use json_file::JsonFileRunStore;
pub use sqlite::SqliteRunStore;

use crate::errors::{StoreError, StoreResult};
use crate::model::{PipelineRun, RunStage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub subject_id: String,
    pub version_hint: String,
    pub stage: RunStage,
    pub updated_at: DateTime<Utc>,
}

impl From<&PipelineRun> for RunSummary {
    fn from(run: &PipelineRun) -> Self {
        Self {
            run_id: run.run_id.clone(),
            subject_id: run.subject_id.clone(),
            version_hint: run.version_hint.clone(),
            stage: run.stage,
            updated_at: run.updated_at,
        }
    }
}

pub trait RunStore: Send + Sync {
    /// Insert or fully replace the snapshot for `run.run_id`.
    fn save(&self, run: &PipelineRun) -> StoreResult<()>;

    fn load(&self, run_id: &str) -> StoreResult<Option<PipelineRun>>;

    /// Most recently updated completed run for a subject.
    fn latest_completed(&self, subject_id: &str) -> StoreResult<Option<PipelineRun>>;

    /// Newest first.
    fn list(&self) -> StoreResult<Vec<RunSummary>>;
}

/// `*.db` / `*.sqlite` paths open a SQLite store, anything else is treated
/// as a JSON state directory.
pub fn open_store(path: &Path) -> StoreResult<Arc<dyn RunStore>> {
    let is_sqlite = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("db" | "sqlite" | "sqlite3")
    );
    if is_sqlite {
        let store = SqliteRunStore::open(path)?;
        store.init_schema()?;
        Ok(Arc::new(store))
    } else {
        Ok(Arc::new(JsonFileRunStore::new(path)))
    }
}

/// Run ids become file names and SQL keys; keep them to a safe alphabet.
pub(crate) fn check_run_id(run_id: &str) -> StoreResult<()> {
    let ok = !run_id.is_empty()
        && run_id.len() <= 128
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !run_id.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidRunId(run_id.to_string()))
    }
}

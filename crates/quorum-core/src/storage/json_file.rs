use super::{check_run_id, RunStore, RunSummary};
use crate::errors::{StoreError, StoreResult};
use crate::model::{PipelineRun, RunStage};
use std::path::{Path, PathBuf};

/// One pretty-printed JSON file per run under `<root>/states/`.
#[derive(Debug, Clone)]
pub struct JsonFileRunStore {
    states: PathBuf,
}

impl JsonFileRunStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            states: root.as_ref().join("states"),
        }
    }

    pub fn states_dir(&self) -> &Path {
        &self.states
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.states.join(format!("{}.json", run_id))
    }

    fn read_all(&self) -> StoreResult<Vec<PipelineRun>> {
        let entries = match std::fs::read_dir(&self.states) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_err(&self.states, source)),
        };
        let mut runs = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| io_err(&self.states, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            match serde_json::from_str::<PipelineRun>(&raw) {
                Ok(run) => runs.push(run),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable run snapshot")
                }
            }
        }
        runs.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.run_id.cmp(&a.run_id))
        });
        Ok(runs)
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl RunStore for JsonFileRunStore {
    fn save(&self, run: &PipelineRun) -> StoreResult<()> {
        check_run_id(&run.run_id)?;
        std::fs::create_dir_all(&self.states).map_err(|e| io_err(&self.states, e))?;
        let json = serde_json::to_string_pretty(run)?;

        // Write-then-rename so a reader never sees a torn snapshot.
        let target = self.path_for(&run.run_id);
        let tmp = self.states.join(format!(".{}.json.tmp", run.run_id));
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &target).map_err(|e| io_err(&target, e))?;
        tracing::debug!(run_id = %run.run_id, stage = %run.stage, path = %target.display(), "run snapshot saved");
        Ok(())
    }

    fn load(&self, run_id: &str) -> StoreResult<Option<PipelineRun>> {
        check_run_id(run_id)?;
        let path = self.path_for(run_id);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    fn latest_completed(&self, subject_id: &str) -> StoreResult<Option<PipelineRun>> {
        Ok(self
            .read_all()?
            .into_iter()
            .find(|r| r.subject_id == subject_id && r.stage == RunStage::Completed))
    }

    fn list(&self) -> StoreResult<Vec<RunSummary>> {
        Ok(self.read_all()?.iter().map(RunSummary::from).collect())
    }
}

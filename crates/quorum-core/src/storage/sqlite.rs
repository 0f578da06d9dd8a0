use super::{check_run_id, schema, RunStore, RunSummary};
use crate::errors::StoreResult;
use crate::model::{PipelineRun, RunStage};
use chrono::SecondsFormat;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct SqliteRunStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRunStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute_batch(schema::DDL)?;
        Ok(())
    }

    fn decode(json: &str) -> StoreResult<PipelineRun> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Fixed-width UTC timestamps so the TEXT column sorts chronologically.
fn sortable(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

impl RunStore for SqliteRunStore {
    fn save(&self, run: &PipelineRun) -> StoreResult<()> {
        check_run_id(&run.run_id)?;
        let snapshot = serde_json::to_string(run)?;
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO runs(run_id, subject_id, version_hint, stage, started_at, updated_at, snapshot_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(run_id) DO UPDATE SET
               subject_id = excluded.subject_id,
               version_hint = excluded.version_hint,
               stage = excluded.stage,
               started_at = excluded.started_at,
               updated_at = excluded.updated_at,
               snapshot_json = excluded.snapshot_json",
            params![
                run.run_id,
                run.subject_id,
                run.version_hint,
                run.stage.as_str(),
                sortable(&run.started_at),
                sortable(&run.updated_at),
                snapshot,
            ],
        )?;
        tracing::debug!(run_id = %run.run_id, stage = %run.stage, "run snapshot saved");
        Ok(())
    }

    fn load(&self, run_id: &str) -> StoreResult<Option<PipelineRun>> {
        check_run_id(run_id)?;
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let json: Option<String> = conn
            .query_row(
                "SELECT snapshot_json FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        json.as_deref().map(Self::decode).transpose()
    }

    fn latest_completed(&self, subject_id: &str) -> StoreResult<Option<PipelineRun>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let json: Option<String> = conn
            .query_row(
                "SELECT snapshot_json FROM runs
                 WHERE subject_id = ?1 AND stage = ?2
                 ORDER BY updated_at DESC, run_id DESC
                 LIMIT 1",
                params![subject_id, RunStage::Completed.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        json.as_deref().map(Self::decode).transpose()
    }

    fn list(&self) -> StoreResult<Vec<RunSummary>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt =
            conn.prepare("SELECT snapshot_json FROM runs ORDER BY updated_at DESC, run_id DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for json in rows {
            let run = Self::decode(&json?)?;
            out.push(RunSummary::from(&run));
        }
        Ok(out)
    }
}

pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
  run_id TEXT PRIMARY KEY,
  subject_id TEXT NOT NULL,
  version_hint TEXT NOT NULL,
  stage TEXT NOT NULL,
  started_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  snapshot_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_subject_stage ON runs(subject_id, stage, updated_at);
"#;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::errors::OrchestrationError;

// --- Signals & fusion ---

/// Independent detector that can announce a new subject version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[serde(alias = "rss")]
    Feed,
    Github,
    Status,
    Manual,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Feed => "feed",
            SourceKind::Github => "github",
            SourceKind::Status => "status",
            SourceKind::Manual => "manual",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feed" | "rss" => Ok(SourceKind::Feed),
            "github" => Ok(SourceKind::Github),
            "status" => Ok(SourceKind::Status),
            "manual" => Ok(SourceKind::Manual),
            other => Err(format!(
                "unknown source kind '{}' (expected one of: feed, github, status, manual)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub subject_id: String,
    pub version_hint: String,
    pub source: SourceKind,
    pub evidence_ref: String,
    pub observed_at: DateTime<Utc>,
}

/// Emitted once per bucket when enough distinct sources corroborate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionEvent {
    pub subject_id: String,
    pub version_hint: String,
    /// Source whose signal completed the bucket.
    pub trigger: SourceKind,
    /// Every source that contributed, in arrival order.
    pub sources: Vec<SourceKind>,
    pub evidence: Vec<String>,
    pub fused_at: DateTime<Utc>,
}

// --- Execution ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Prompt sent to the target tool.
    Probe,
    /// Inspection of the target platform (UI, docs, policy).
    Check,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Probe => "probe",
            ItemKind::Check => "check",
        }
    }
}

/// One unit of work handed to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub kind: ItemKind,
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerSettings {
    pub rate_limit_per_min: Option<u32>,
    pub per_call_timeout_ms: u64,
    pub parallel: usize,
    pub retries: u32,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            rate_limit_per_min: None,
            per_call_timeout_ms: 60_000,
            parallel: 4,
            retries: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub run_id: String,
    pub tool_id: String,
    pub tool_version: String,
    /// First evidence reference of the fusion event, if any (site, release page).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub items: Vec<WorkItem>,
    pub settings: RunnerSettings,
}

/// Successful collaborator reply for one work item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub output: String,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionItem {
    pub id: String,
    pub kind: ItemKind,
    pub input: String,
    pub output: String,
    pub evidence_refs: Vec<String>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub attempts: u32,
    /// Set when every attempt failed; the item still counts toward the batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionItem {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub mean_latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_id: String,
    pub tool_id: String,
    pub tool_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Same order as the request items.
    pub items: Vec<ExecutionItem>,
    pub summary: ExecutionSummary,
}

// --- Rating ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_text: Option<String>,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    #[serde(default)]
    pub metadata: EvidenceMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingItem {
    pub id: String,
    pub dimension_key: String,
    pub max_points: f64,
    pub rubric: String,
    pub evidence: EvidenceBundle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingRequest {
    pub run_id: String,
    pub tool_id: String,
    pub tool_version: String,
    pub items: Vec<RatingItem>,
    pub num_raters: u32,
    /// Upstream item count; larger than `items.len()` when some items could
    /// not be turned into rating items.
    pub requested_items: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreStatus {
    Parsed,
    Clamped,
    Malformed,
    CallFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaterScore {
    pub rater: String,
    pub score: f64,
    pub notes: String,
    pub evidence_flags: BTreeSet<String>,
    pub status: ScoreStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsensusScore {
    /// Arithmetic mean of the rater scores.
    pub raw_score: f64,
    /// `max(0, 1 - 2·CV)`, see `consensus::stats::agreement`.
    pub agreement: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub id: String,
    pub dimension_key: String,
    pub max_points: f64,
    pub scores: Vec<RaterScore>,
    pub consensus: ConsensusScore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub tested: usize,
    pub total: usize,
}

impl Coverage {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.tested as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingResult {
    pub run_id: String,
    pub tool_id: String,
    pub tool_version: String,
    pub scored: Vec<ScoredItem>,
    pub coverage: Coverage,
}

// --- Publication ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension_key: String,
    pub raw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceIndexEntry {
    pub id: String,
    pub refs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreviousPublication {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<f64>,
    #[serde(default)]
    pub badges: Vec<String>,
    #[serde(default)]
    pub dimension_scores: Vec<DimensionScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishInput {
    pub tool_id: String,
    pub tool_version: String,
    pub dimension_scores: Vec<DimensionScore>,
    pub confidence: f64,
    #[serde(default)]
    pub evidence_flags: BTreeSet<String>,
    #[serde(default)]
    pub evidence_index: Vec<EvidenceIndexEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<PreviousPublication>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionAggregate {
    pub dimension_key: String,
    pub raw: f64,
    pub normalized: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub tool_id: String,
    pub tool_version: String,
    /// Weighted composite on a 0..=100 scale, one decimal.
    pub composite: f64,
    pub confidence: f64,
    pub breakdown: Vec<DimensionAggregate>,
    pub badges: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishOutput {
    pub aggregate: AggregateResult,
    pub diff_summary: String,
}

impl PublishOutput {
    pub fn as_previous(&self) -> PreviousPublication {
        PreviousPublication {
            composite: Some(self.aggregate.composite),
            badges: self.aggregate.badges.clone(),
            dimension_scores: self
                .aggregate
                .breakdown
                .iter()
                .map(|d| DimensionScore {
                    dimension_key: d.dimension_key.clone(),
                    raw: d.raw,
                })
                .collect(),
        }
    }
}

// --- Pipeline run ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStage {
    Watcher,
    Runner,
    Judge,
    Publisher,
    Completed,
    Failed,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Watcher => "watcher",
            RunStage::Runner => "runner",
            RunStage::Judge => "judge",
            RunStage::Publisher => "publisher",
            RunStage::Completed => "completed",
            RunStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStage::Completed | RunStage::Failed)
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full snapshot of one pipeline run. Persisted by overwrite; the newest
/// snapshot for a run id is the only one ever read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub stage: RunStage,
    pub subject_id: String,
    pub version_hint: String,
    pub config_digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fusion_event: Option<FusionEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_request: Option<ExecutionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_request: Option<RatingRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_result: Option<RatingResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_input: Option<PublishInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_output: Option<PublishOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OrchestrationError>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

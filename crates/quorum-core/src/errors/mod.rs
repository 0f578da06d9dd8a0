//! Error taxonomy shared by every pipeline stage.
//!
//! Request-level failures are values of [`OrchestrationError`]; they are
//! serialized into the run record when a stage fails, so the type is plain
//! data (Clone + Serialize) rather than a boxed error chain.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage an error originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Watcher,
    Runner,
    Judge,
    Publisher,
    Coordinator,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Watcher => "WATCHER",
            Stage::Runner => "RUNNER",
            Stage::Judge => "JUDGE",
            Stage::Publisher => "PUBLISHER",
            Stage::Coordinator => "COORDINATOR",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad shape or range. Fails fast, no side effects.
    Validation,
    /// An executor or rater call failed or timed out.
    ExternalCall,
    /// Scoring inputs disagree with configuration (unknown dimension, no dimensions).
    ConsensusIntegrity,
    /// Any of the above escalated to pipeline level.
    StageFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::ExternalCall => "external_call",
            ErrorKind::ConsensusIntegrity => "consensus_integrity",
            ErrorKind::StageFailure => "stage_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("[{stage}] {message}")]
pub struct OrchestrationError {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl OrchestrationError {
    pub fn new(stage: Stage, kind: ErrorKind, message: impl Into<String>) -> Self {
        let recoverable = matches!(kind, ErrorKind::ExternalCall);
        Self {
            stage,
            kind,
            message: message.into(),
            recoverable,
            details: None,
        }
    }

    pub fn validation(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Validation, message)
    }

    pub fn external_call(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::ExternalCall, message)
    }

    pub fn consensus_integrity(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::ConsensusIntegrity, message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Promote to a pipeline-level failure. The originating stage and the
    /// original kind (under `details.cause_kind`) are preserved.
    pub fn escalate(self) -> Self {
        if self.kind == ErrorKind::StageFailure {
            return self;
        }
        let mut details = match self.details {
            Some(serde_json::Value::Object(map)) => map,
            Some(other) => {
                let mut map = serde_json::Map::new();
                map.insert("detail".into(), other);
                map
            }
            None => serde_json::Map::new(),
        };
        details.insert("cause_kind".into(), self.kind.as_str().into());
        Self {
            stage: self.stage,
            kind: ErrorKind::StageFailure,
            message: self.message,
            recoverable: false,
            details: Some(serde_json::Value::Object(details)),
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind == ErrorKind::Validation
    }
}

/// Configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("unsupported config version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Run persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid run id '{0}'")]
    InvalidRunId(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

//! Benchmark configuration: dimensions, execution specs, badge rules and
//! runtime settings. Loaded once, validated, then shared read-only.

use crate::errors::ConfigError;
use crate::model::{ItemKind, RunnerSettings};
use crate::publish::badges::BadgeRule;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

/// Allowed drift of the weight sum from 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-3;

/// Upper bound for `settings.parallel`; well under the semaphore permit limit.
pub const MAX_PARALLEL: usize = 1024;

/// Upper bound for `fusion.retention_hours` (ten years).
pub const MAX_RETENTION_HOURS: u64 = 10 * 365 * 24;

pub const SAMPLE_CONFIG: &str = include_str!("../../assets/benchmark.yaml");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DimensionConfig {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub max_points: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionSpec {
    pub id: String,
    pub kind: ItemKind,
    pub dimension_key: String,
    pub max_points: f64,
    pub rubric: String,
    /// Prompt for probes, command string (e.g. `playwright:contrast_audit`) for checks.
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Settings {
    pub num_raters: u32,
    pub rate_limit_per_min: Option<u32>,
    pub per_call_timeout_ms: u64,
    pub parallel: usize,
    pub retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            num_raters: 3,
            rate_limit_per_min: None,
            per_call_timeout_ms: 60_000,
            parallel: 4,
            retries: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FusionSettings {
    /// Distinct sources required before a fusion event fires (K).
    pub threshold: usize,
    pub retention_hours: u64,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            threshold: 2,
            retention_hours: 7 * 24,
        }
    }
}

impl FusionSettings {
    pub fn retention(&self) -> chrono::Duration {
        i64::try_from(self.retention_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    pub version: u32,
    pub suite: String,
    pub dimensions: Vec<DimensionConfig>,
    #[serde(default)]
    pub execution: Vec<ExecutionSpec>,
    #[serde(default)]
    pub badges: Vec<BadgeRule>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub fusion: FusionSettings,
}

impl BenchConfig {
    pub fn dimension(&self, key: &str) -> Option<&DimensionConfig> {
        self.dimensions.iter().find(|d| d.key == key)
    }

    pub fn execution_spec(&self, id: &str) -> Option<&ExecutionSpec> {
        self.execution.iter().find(|s| s.id == id)
    }

    pub fn weight_sum(&self) -> f64 {
        self.dimensions.iter().map(|d| d.weight).sum()
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            rate_limit_per_min: self.settings.rate_limit_per_min,
            per_call_timeout_ms: self.settings.per_call_timeout_ms,
            parallel: self.settings.parallel,
            retries: self.settings.retries,
        }
    }

    /// sha256 over the canonical JSON form; recorded on every run.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut h = Sha256::new();
        h.update(&bytes);
        format!("sha256:{}", hex::encode(h.finalize()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != SUPPORTED_CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: self.version,
                supported: SUPPORTED_CONFIG_VERSION,
            });
        }
        if self.dimensions.is_empty() {
            return Err(invalid("config has no dimensions"));
        }

        let mut keys = HashSet::new();
        for d in &self.dimensions {
            if d.key.trim().is_empty() {
                return Err(invalid("dimension key must not be empty"));
            }
            if !keys.insert(d.key.as_str()) {
                return Err(invalid(format!("duplicate dimension key '{}'", d.key)));
            }
            if !(d.max_points.is_finite() && d.max_points > 0.0) {
                return Err(invalid(format!(
                    "dimension '{}' must have positive max_points",
                    d.key
                )));
            }
            if !(d.weight.is_finite() && d.weight >= 0.0) {
                return Err(invalid(format!(
                    "dimension '{}' has a negative or non-finite weight",
                    d.key
                )));
            }
        }
        let sum = self.weight_sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(invalid(format!(
                "dimension weights must sum to 1.0 (got {:.4})",
                sum
            )));
        }

        if self.execution.is_empty() {
            return Err(invalid("config has no execution specs"));
        }
        let mut ids = HashSet::new();
        for spec in &self.execution {
            if spec.id.trim().is_empty() {
                return Err(invalid("execution spec id must not be empty"));
            }
            if !ids.insert(spec.id.as_str()) {
                return Err(invalid(format!("duplicate execution spec id '{}'", spec.id)));
            }
            if !keys.contains(spec.dimension_key.as_str()) {
                return Err(invalid(format!(
                    "execution spec '{}' references unknown dimension '{}'",
                    spec.id, spec.dimension_key
                )));
            }
            if !(spec.max_points.is_finite() && spec.max_points > 0.0) {
                return Err(invalid(format!(
                    "execution spec '{}' must have positive max_points",
                    spec.id
                )));
            }
            if spec.rubric.trim().is_empty() {
                return Err(invalid(format!("execution spec '{}' has an empty rubric", spec.id)));
            }
        }

        let mut badge_keys = HashSet::new();
        for rule in &self.badges {
            if !badge_keys.insert(rule.key.as_str()) {
                return Err(invalid(format!("duplicate badge key '{}'", rule.key)));
            }
            for dim in rule.when.dimensions() {
                if !keys.contains(dim) {
                    return Err(invalid(format!(
                        "badge '{}' references unknown dimension '{}'",
                        rule.key, dim
                    )));
                }
            }
        }

        if self.settings.num_raters < 1 {
            return Err(invalid("settings.num_raters must be >= 1"));
        }
        if self.settings.parallel < 1 || self.settings.parallel > MAX_PARALLEL {
            return Err(invalid(format!(
                "settings.parallel must be between 1 and {}",
                MAX_PARALLEL
            )));
        }
        if self.settings.rate_limit_per_min == Some(0) {
            return Err(invalid("settings.rate_limit_per_min must be > 0 when set"));
        }
        if self.settings.per_call_timeout_ms == 0 {
            return Err(invalid("settings.per_call_timeout_ms must be > 0"));
        }
        if self.fusion.threshold < 1 {
            return Err(invalid("fusion.threshold must be >= 1"));
        }
        if self.fusion.retention_hours > MAX_RETENTION_HOURS {
            return Err(invalid(format!(
                "fusion.retention_hours must be <= {}",
                MAX_RETENTION_HOURS
            )));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

pub fn parse_config(raw: &str) -> Result<BenchConfig, ConfigError> {
    let cfg: BenchConfig = serde_yaml::from_str(raw)?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn load_config(path: &Path) -> Result<BenchConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let cfg = parse_config(&raw)?;
    tracing::debug!(
        path = %path.display(),
        dimensions = cfg.dimensions.len(),
        execution = cfg.execution.len(),
        badges = cfg.badges.len(),
        "loaded benchmark config"
    );
    Ok(cfg)
}

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(path, SAMPLE_CONFIG).map_err(|source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    })
}

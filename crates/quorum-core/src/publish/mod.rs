//! Aggregation and publication: per-dimension scores become one weighted
//! composite on a 0..=100 scale, a badge set and a diff summary.

pub mod badges;
pub mod diff;

use crate::config::BenchConfig;
use crate::errors::{OrchestrationError, Stage};
use crate::model::{AggregateResult, DimensionAggregate, PublishInput, PublishOutput};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub const COMPOSITE_SCALE: f64 = 100.0;

pub struct Publisher {
    config: Arc<BenchConfig>,
}

impl Publisher {
    pub fn new(config: Arc<BenchConfig>) -> Self {
        Self { config }
    }

    /// Validate, aggregate, assign badges and describe the change. Nothing is
    /// written anywhere; persistence belongs to the coordinator.
    pub fn publish(&self, input: &PublishInput) -> Result<PublishOutput, OrchestrationError> {
        self.validate(input)?;

        let breakdown: Vec<DimensionAggregate> = self
            .config
            .dimensions
            .iter()
            .filter_map(|dim| {
                input
                    .dimension_scores
                    .iter()
                    .find(|s| s.dimension_key == dim.key)
                    .map(|s| DimensionAggregate {
                        dimension_key: dim.key.clone(),
                        raw: s.raw,
                        normalized: s.raw / dim.max_points,
                        weight: dim.weight,
                    })
            })
            .collect();

        let composite = composite_score(&breakdown);
        let scores: BTreeMap<String, f64> = breakdown
            .iter()
            .map(|d| (d.dimension_key.clone(), d.raw))
            .collect();
        let badges = badges::assign_badges(&self.config.badges, &scores, &input.evidence_flags);

        let aggregate = AggregateResult {
            tool_id: input.tool_id.clone(),
            tool_version: input.tool_version.clone(),
            composite,
            confidence: input.confidence,
            breakdown,
            badges,
        };

        let diff_summary = match &input.previous {
            None => diff::first_publication(&aggregate),
            Some(prev) => diff::summarize(&aggregate, prev, &self.config.dimensions)
                .unwrap_or_else(|reason| {
                    tracing::warn!(tool = %input.tool_id, %reason, "diff against previous publication failed");
                    diff::first_publication(&aggregate)
                }),
        };

        tracing::info!(
            tool = %input.tool_id,
            version = %input.tool_version,
            composite = aggregate.composite,
            confidence = aggregate.confidence,
            badges = aggregate.badges.len(),
            "publication computed"
        );

        Ok(PublishOutput {
            aggregate,
            diff_summary,
        })
    }

    fn validate(&self, input: &PublishInput) -> Result<(), OrchestrationError> {
        if self.config.dimensions.is_empty() {
            return Err(OrchestrationError::consensus_integrity(
                Stage::Publisher,
                "no dimensions configured",
            ));
        }
        if input.tool_id.trim().is_empty() || input.tool_version.trim().is_empty() {
            return Err(OrchestrationError::validation(
                Stage::Publisher,
                "tool_id and tool_version are required",
            ));
        }
        if !(input.confidence.is_finite() && (0.0..=1.0).contains(&input.confidence)) {
            return Err(OrchestrationError::validation(
                Stage::Publisher,
                format!("confidence must be within [0, 1], got {}", input.confidence),
            ));
        }

        let mut seen = HashSet::new();
        for score in &input.dimension_scores {
            let Some(dim) = self.config.dimension(&score.dimension_key) else {
                return Err(OrchestrationError::consensus_integrity(
                    Stage::Publisher,
                    format!("unknown dimension: {}", score.dimension_key),
                )
                .with_details(serde_json::json!({ "dimension": score.dimension_key })));
            };
            if !seen.insert(score.dimension_key.as_str()) {
                return Err(OrchestrationError::validation(
                    Stage::Publisher,
                    format!("duplicate score for dimension {}", score.dimension_key),
                ));
            }
            if !(score.raw.is_finite() && (0.0..=dim.max_points).contains(&score.raw)) {
                return Err(OrchestrationError::validation(
                    Stage::Publisher,
                    format!(
                        "score {} for {} outside [0, {}]",
                        score.raw, score.dimension_key, dim.max_points
                    ),
                )
                .with_details(serde_json::json!({
                    "dimension": score.dimension_key,
                    "raw": score.raw,
                    "max_points": dim.max_points,
                })));
            }
        }
        Ok(())
    }
}

/// Weighted mean of the normalized scores of the dimensions present, scaled
/// to 0..=100 and rounded to one decimal. Absent dimensions drop out of both
/// numerator and denominator.
pub fn composite_score(breakdown: &[DimensionAggregate]) -> f64 {
    let weight: f64 = breakdown.iter().map(|d| d.weight).sum();
    if weight <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = breakdown.iter().map(|d| d.normalized * d.weight).sum();
    round1(weighted / weight * COMPOSITE_SCALE)
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DimensionConfig, FusionSettings, Settings};
    use crate::errors::ErrorKind;
    use crate::model::{DimensionScore, PreviousPublication};
    use badges::{BadgePredicate, BadgeRule};

    fn config() -> Arc<BenchConfig> {
        Arc::new(BenchConfig {
            version: 1,
            suite: "t".into(),
            dimensions: vec![
                DimensionConfig {
                    key: "x".into(),
                    name: "X".into(),
                    description: String::new(),
                    max_points: 10.0,
                    weight: 0.5,
                },
                DimensionConfig {
                    key: "y".into(),
                    name: "Y".into(),
                    description: String::new(),
                    max_points: 10.0,
                    weight: 0.5,
                },
            ],
            execution: vec![],
            badges: vec![BadgeRule {
                key: "x_star".into(),
                name: "X Star".into(),
                description: String::new(),
                when: BadgePredicate::All {
                    of: vec![
                        BadgePredicate::MinScore {
                            dimension: "x".into(),
                            at_least: 8.0,
                        },
                        BadgePredicate::HasFlag {
                            flag: "chunking".into(),
                        },
                    ],
                },
            }],
            settings: Settings::default(),
            fusion: FusionSettings::default(),
        })
    }

    fn input(scores: &[(&str, f64)], flags: &[&str]) -> PublishInput {
        PublishInput {
            tool_id: "chatbot".into(),
            tool_version: "2.1".into(),
            dimension_scores: scores
                .iter()
                .map(|(k, r)| DimensionScore {
                    dimension_key: (*k).into(),
                    raw: *r,
                })
                .collect(),
            confidence: 0.9,
            evidence_flags: flags.iter().map(|s| (*s).to_string()).collect(),
            evidence_index: vec![],
            previous: None,
        }
    }

    #[test]
    fn two_dimension_composite() {
        let out = Publisher::new(config())
            .publish(&input(&[("x", 8.0), ("y", 6.0)], &["chunking"]))
            .unwrap();
        assert_eq!(out.aggregate.composite, 70.0);
        let normalized: Vec<f64> = out.aggregate.breakdown.iter().map(|d| d.normalized).collect();
        assert_eq!(normalized, vec![0.8, 0.6]);
        assert_eq!(out.aggregate.badges, vec!["x_star".to_string()]);
        assert!(out.diff_summary.starts_with("First publication: composite 70.0"));
    }

    #[test]
    fn publishing_twice_is_idempotent() {
        let p = Publisher::new(config());
        let inp = input(&[("x", 9.0), ("y", 3.3)], &["chunking"]);
        let a = p.publish(&inp).unwrap();
        let b = p.publish(&inp).unwrap();
        assert_eq!(a.aggregate.composite, b.aggregate.composite);
        assert_eq!(a.aggregate.badges, b.aggregate.badges);
        assert_eq!(a, b);
    }

    #[test]
    fn absent_dimensions_are_excluded_not_zeroed() {
        let out = Publisher::new(config())
            .publish(&input(&[("x", 8.0)], &[]))
            .unwrap();
        assert_eq!(out.aggregate.breakdown.len(), 1);
        assert_eq!(out.aggregate.composite, 80.0);
    }

    #[test]
    fn badges_are_not_sticky() {
        let p = Publisher::new(config());
        let mut inp = input(&[("x", 6.0), ("y", 6.0)], &["chunking"]);
        inp.previous = Some(PreviousPublication {
            composite: Some(90.0),
            badges: vec!["x_star".into()],
            dimension_scores: vec![],
        });
        let out = p.publish(&inp).unwrap();
        assert!(out.aggregate.badges.is_empty());
        assert!(out.diff_summary.contains("Lost: x_star"));
    }

    #[test]
    fn unknown_dimension_is_an_integrity_error() {
        let err = Publisher::new(config())
            .publish(&input(&[("z", 1.0)], &[]))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConsensusIntegrity);
        assert_eq!(err.stage, Stage::Publisher);
        assert!(!err.recoverable);
    }

    #[test]
    fn out_of_range_inputs_are_rejected() {
        let p = Publisher::new(config());
        assert!(p.publish(&input(&[("x", 10.5)], &[])).unwrap_err().is_validation());
        assert!(p.publish(&input(&[("x", -0.1)], &[])).unwrap_err().is_validation());
        assert!(p
            .publish(&input(&[("x", 1.0), ("x", 2.0)], &[]))
            .unwrap_err()
            .is_validation());

        let mut inp = input(&[("x", 1.0)], &[]);
        inp.confidence = 1.2;
        assert!(p.publish(&inp).unwrap_err().is_validation());
        inp.confidence = f64::NAN;
        assert!(p.publish(&inp).unwrap_err().is_validation());
        inp.confidence = 0.5;
        inp.tool_version = " ".into();
        assert!(p.publish(&inp).unwrap_err().is_validation());
    }

    #[test]
    fn no_configured_dimensions_is_an_integrity_error() {
        let mut cfg = (*config()).clone();
        cfg.dimensions.clear();
        let err = Publisher::new(Arc::new(cfg))
            .publish(&input(&[], &[]))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConsensusIntegrity);
    }

    #[test]
    fn unusable_baseline_degrades_to_first_publication() {
        let mut inp = input(&[("x", 5.0), ("y", 5.0)], &[]);
        inp.previous = Some(PreviousPublication {
            composite: Some(f64::INFINITY),
            ..PreviousPublication::default()
        });
        let out = Publisher::new(config()).publish(&inp).unwrap();
        assert!(out.diff_summary.starts_with("First publication"));
    }
}

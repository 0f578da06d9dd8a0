//! Pure request builders: each stage's request is a function of the prior
//! stage's result plus static configuration.

use crate::config::BenchConfig;
use crate::consensus::stats;
use crate::errors::{OrchestrationError, Stage};
use crate::model::{
    DimensionScore, EvidenceBundle, EvidenceIndexEntry, EvidenceMetadata, ExecutionRequest,
    ExecutionResult, FusionEvent, PreviousPublication, PublishInput, RatingItem, RatingRequest,
    RatingResult, WorkItem,
};

pub fn execution_request(
    config: &BenchConfig,
    run_id: &str,
    event: &FusionEvent,
) -> Result<ExecutionRequest, OrchestrationError> {
    if event.subject_id.trim().is_empty() || event.version_hint.trim().is_empty() {
        return Err(OrchestrationError::validation(
            Stage::Watcher,
            "fusion event must name a subject and version",
        ));
    }
    if config.execution.is_empty() {
        return Err(OrchestrationError::validation(
            Stage::Watcher,
            "no execution specs configured",
        ));
    }
    Ok(ExecutionRequest {
        run_id: run_id.to_string(),
        tool_id: event.subject_id.clone(),
        tool_version: event.version_hint.clone(),
        site: event.evidence.first().cloned(),
        items: config
            .execution
            .iter()
            .map(|spec| WorkItem {
                id: spec.id.clone(),
                kind: spec.kind,
                input: spec.input.clone(),
            })
            .collect(),
        settings: config.runner_settings(),
    })
}

/// One rating item per execution item, errored ones included. Items whose
/// spec has vanished from the configuration cannot be rated and lower the
/// coverage instead.
pub fn rating_request(
    config: &BenchConfig,
    result: &ExecutionResult,
) -> Result<RatingRequest, OrchestrationError> {
    let mut items = Vec::with_capacity(result.items.len());
    for exec in &result.items {
        let Some(spec) = config.execution_spec(&exec.id) else {
            tracing::warn!(run_id = %result.run_id, item_id = %exec.id, "no execution spec for item; not rated");
            continue;
        };
        items.push(RatingItem {
            id: exec.id.clone(),
            dimension_key: spec.dimension_key.clone(),
            max_points: spec.max_points,
            rubric: spec.rubric.clone(),
            evidence: EvidenceBundle {
                output_text: Some(exec.output.clone()).filter(|s| !s.trim().is_empty()),
                evidence_refs: exec.evidence_refs.clone(),
                metadata: EvidenceMetadata {
                    latency_ms: Some(exec.latency_ms),
                    tokens_used: exec.tokens_used,
                    cost_usd: exec.cost_usd,
                    error: exec.error.clone(),
                },
            },
        });
    }
    if items.is_empty() {
        return Err(OrchestrationError::validation(
            Stage::Runner,
            "no execution item could be turned into a rating item",
        ));
    }
    Ok(RatingRequest {
        run_id: result.run_id.clone(),
        tool_id: result.tool_id.clone(),
        tool_version: result.tool_version.clone(),
        items,
        num_raters: config.settings.num_raters,
        requested_items: result.items.len(),
    })
}

/// `(Σ raw / Σ item max) × dimension max` per dimension, in configuration
/// order. Dimensions no item scored into are left out. Keys the
/// configuration does not know are passed through unscaled so the
/// publisher can reject them.
pub fn dimension_scores(config: &BenchConfig, rating: &RatingResult) -> Vec<DimensionScore> {
    let mut out = Vec::new();
    for dim in &config.dimensions {
        let (raw, max) = rating
            .scored
            .iter()
            .filter(|s| s.dimension_key == dim.key)
            .fold((0.0, 0.0), |(r, m), s| (r + s.consensus.raw_score, m + s.max_points));
        if max > 0.0 {
            out.push(DimensionScore {
                dimension_key: dim.key.clone(),
                raw: (raw / max * dim.max_points).clamp(0.0, dim.max_points),
            });
        }
    }
    for s in &rating.scored {
        let known = config.dimension(&s.dimension_key).is_some();
        let listed = out.iter().any(|d| d.dimension_key == s.dimension_key);
        if !known && !listed {
            out.push(DimensionScore {
                dimension_key: s.dimension_key.clone(),
                raw: s.consensus.raw_score,
            });
        }
    }
    out
}

pub fn publish_input(
    config: &BenchConfig,
    execution: Option<&ExecutionResult>,
    rating: &RatingResult,
    previous: Option<PreviousPublication>,
) -> PublishInput {
    let evidence_index = execution
        .map(|e| {
            e.items
                .iter()
                .filter(|i| !i.evidence_refs.is_empty())
                .map(|i| EvidenceIndexEntry {
                    id: i.id.clone(),
                    refs: i.evidence_refs.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    PublishInput {
        tool_id: rating.tool_id.clone(),
        tool_version: rating.tool_version.clone(),
        dimension_scores: dimension_scores(config, rating),
        confidence: stats::confidence(&rating.scored, rating.coverage),
        evidence_flags: stats::all_evidence_flags(&rating.scored),
        evidence_index,
        previous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::model::{ConsensusScore, Coverage, ScoredItem};

    const CONFIG: &str = r#"
version: 1
suite: t
dimensions:
  - { key: x, name: X, max_points: 10, weight: 0.5 }
  - { key: y, name: Y, max_points: 20, weight: 0.5 }
execution:
  - { id: x1, kind: probe, dimension_key: x, max_points: 10, rubric: r, input: "p1" }
  - { id: y1, kind: check, dimension_key: y, max_points: 4, rubric: r, input: "api:a" }
  - { id: y2, kind: check, dimension_key: y, max_points: 1, rubric: r, input: "api:b" }
"#;

    fn scored(id: &str, dim: &str, max: f64, raw: f64, agreement: f64) -> ScoredItem {
        ScoredItem {
            id: id.into(),
            dimension_key: dim.into(),
            max_points: max,
            scores: vec![],
            consensus: ConsensusScore {
                raw_score: raw,
                agreement,
            },
        }
    }

    fn rating(scored: Vec<ScoredItem>, total: usize) -> RatingResult {
        RatingResult {
            run_id: "r".into(),
            tool_id: "t".into(),
            tool_version: "1".into(),
            coverage: Coverage {
                tested: scored.len(),
                total,
            },
            scored,
        }
    }

    #[test]
    fn dimension_rollup_is_point_weighted() {
        let cfg = parse_config(CONFIG).unwrap();
        let r = rating(
            vec![
                scored("x1", "x", 10.0, 8.0, 1.0),
                scored("y1", "y", 4.0, 4.0, 1.0),
                scored("y2", "y", 1.0, 0.0, 1.0),
            ],
            3,
        );
        let dims = dimension_scores(&cfg, &r);
        assert_eq!(dims.len(), 2);
        assert_eq!(dims[0].raw, 8.0);
        // (4 + 0) / (4 + 1) * 20
        assert!((dims[1].raw - 16.0).abs() < 1e-9);
    }

    #[test]
    fn unscored_dimension_is_absent_and_unknown_passes_through() {
        let cfg = parse_config(CONFIG).unwrap();
        let r = rating(
            vec![scored("x1", "x", 10.0, 5.0, 1.0), scored("z1", "z", 5.0, 2.0, 1.0)],
            2,
        );
        let keys: Vec<_> = dimension_scores(&cfg, &r)
            .into_iter()
            .map(|d| d.dimension_key)
            .collect();
        assert_eq!(keys, vec!["x", "z"]);
    }

    #[test]
    fn confidence_is_agreement_times_coverage() {
        let cfg = parse_config(CONFIG).unwrap();
        let r = rating(
            vec![scored("x1", "x", 10.0, 5.0, 0.8), scored("y1", "y", 4.0, 2.0, 0.6)],
            4,
        );
        let input = publish_input(&cfg, None, &r, None);
        assert!((input.confidence - 0.35).abs() < 1e-9);
    }
}

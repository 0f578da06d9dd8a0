use crate::config::BenchConfig;
use crate::model::{PipelineRun, RunStage};
use crate::storage::RunSummary;
use std::fmt::Write as _;

/// Plain-text summary of one run. Deterministic, unit-testable.
#[must_use]
pub fn format_run_summary(run: &PipelineRun, config: &BenchConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Run {} [{}] {} {}",
        run.run_id, run.stage, run.subject_id, run.version_hint
    );

    if let Some(ev) = &run.fusion_event {
        let sources: Vec<&str> = ev.sources.iter().map(|s| s.as_str()).collect();
        let _ = writeln!(
            out,
            "  trigger: {} (sources: {})",
            ev.trigger,
            sources.join(", ")
        );
    }

    if let Some(exec) = &run.execution_result {
        let s = &exec.summary;
        let _ = writeln!(
            out,
            "  execution: {}/{} ok, {} failed, cost ${:.4}, mean latency {:.0}ms",
            s.succeeded, s.total, s.failed, s.total_cost_usd, s.mean_latency_ms
        );
    }

    if let Some(rating) = &run.rating_result {
        let agreement = crate::consensus::stats::average_agreement(&rating.scored);
        let _ = writeln!(
            out,
            "  rating: {}/{} items, agreement {:.2}{}",
            rating.coverage.tested,
            rating.coverage.total,
            agreement,
            if crate::consensus::stats::has_acceptable_agreement(&rating.scored) {
                ""
            } else {
                " (low)"
            }
        );
    }

    if let Some(publish) = &run.publish_output {
        let agg = &publish.aggregate;
        let _ = writeln!(
            out,
            "  composite: {:.1}/100  confidence: {:.2}",
            agg.composite, agg.confidence
        );
        let badges = if agg.badges.is_empty() {
            "-".to_string()
        } else {
            agg.badges.join(", ")
        };
        let _ = writeln!(out, "  badges: {}", badges);
        let _ = writeln!(out, "  {}", publish.diff_summary);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "  {:<28} {:>7} {:>7} {:>6}",
            "dimension", "raw", "norm", "weight"
        );
        for d in &agg.breakdown {
            let name = config
                .dimension(&d.dimension_key)
                .map(|c| c.name.as_str())
                .unwrap_or(d.dimension_key.as_str());
            let _ = writeln!(
                out,
                "  {:<28} {:>7.2} {:>7.2} {:>6.2}",
                name, d.raw, d.normalized, d.weight
            );
        }
    }

    if run.stage == RunStage::Failed {
        if let Some(err) = &run.error {
            let _ = writeln!(
                out,
                "  error: {} ({}, recoverable={})",
                err, err.kind.as_str(), err.recoverable
            );
        }
    }
    out
}

#[must_use]
pub fn format_dimensions(config: &BenchConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<26} {:<28} {:>6} {:>7} {:>6}",
        "key", "name", "max", "weight", "items"
    );
    for d in &config.dimensions {
        let items = config
            .execution
            .iter()
            .filter(|s| s.dimension_key == d.key)
            .count();
        let _ = writeln!(
            out,
            "{:<26} {:<28} {:>6} {:>7.3} {:>6}",
            d.key, d.name, d.max_points, d.weight, items
        );
    }
    let _ = writeln!(out, "weight sum: {:.4}", config.weight_sum());
    out
}

#[must_use]
pub fn format_run_list(runs: &[RunSummary]) -> String {
    let mut out = String::new();
    for r in runs {
        let _ = writeln!(
            out,
            "{}  {:<10} {} {}  {}",
            r.run_id,
            r.stage.as_str(),
            r.subject_id,
            r.version_hint,
            r.updated_at.to_rfc3339()
        );
    }
    out
}

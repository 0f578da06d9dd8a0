//! Multi-rater consensus scoring.
//!
//! Each rating item is fanned out to `num_raters` independent raters in
//! parallel, each under its own timeout. Replies are parsed by a total
//! function; a malformed reply or failed call degrades to a zero score for
//! that rater instead of aborting the item. Scores are clamped to
//! `[0, max_points]` before the mean and the CV-based agreement are taken.

mod parse;
mod prompt;
pub mod stats;

pub use parse::{parse_reply, RaterReply};

use crate::errors::{OrchestrationError, Stage};
use crate::model::{
    Coverage, RaterScore, RatingItem, RatingRequest, RatingResult, ScoreStatus, ScoredItem,
};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::time::{timeout, Duration};

pub const PARSE_FAILURE_NOTES: &str = "parse failure";

/// One rater invocation. `prompt` is identical for every rater of an item.
#[derive(Debug, Clone)]
pub struct RaterCall<'a> {
    pub run_id: &'a str,
    pub item_id: &'a str,
    pub dimension_key: &'a str,
    pub max_points: f64,
    pub rater_index: usize,
    pub prompt: &'a str,
}

#[async_trait]
pub trait Rater: Send + Sync {
    /// Raw reply text; parsing happens on the consensus side.
    async fn rate(&self, call: &RaterCall<'_>) -> anyhow::Result<String>;

    fn name(&self) -> &str;
}

pub struct ConsensusRater {
    raters: Vec<Arc<dyn Rater>>,
    per_call_timeout: Duration,
}

impl ConsensusRater {
    /// Rater slot `i` is served by `raters[i % raters.len()]`.
    pub fn new(raters: Vec<Arc<dyn Rater>>, per_call_timeout_ms: u64) -> Self {
        Self {
            raters,
            per_call_timeout: Duration::from_millis(per_call_timeout_ms),
        }
    }

    pub async fn rate(&self, req: &RatingRequest) -> Result<RatingResult, OrchestrationError> {
        validate_request(req)?;
        if self.raters.is_empty() {
            return Err(OrchestrationError::validation(
                Stage::Judge,
                "no raters configured",
            ));
        }

        tracing::info!(
            run_id = %req.run_id,
            items = req.items.len(),
            num_raters = req.num_raters,
            "rating items"
        );

        let mut scored = Vec::with_capacity(req.items.len());
        for item in &req.items {
            scored.push(self.rate_item(req, item).await);
        }

        let coverage = Coverage {
            tested: scored.len(),
            total: req.requested_items.max(req.items.len()),
        };
        tracing::info!(
            run_id = %req.run_id,
            tested = coverage.tested,
            total = coverage.total,
            agreement = stats::average_agreement(&scored),
            "rating finished"
        );

        Ok(RatingResult {
            run_id: req.run_id.clone(),
            tool_id: req.tool_id.clone(),
            tool_version: req.tool_version.clone(),
            scored,
            coverage,
        })
    }

    async fn rate_item(&self, req: &RatingRequest, item: &RatingItem) -> ScoredItem {
        let prompt = prompt::build_instruction(item);
        let n = req.num_raters as usize;
        let label_by_index = n > self.raters.len();

        let calls = (0..n).map(|i| {
            let rater = self.raters[i % self.raters.len()].clone();
            let label = if label_by_index {
                format!("{}#{}", rater.name(), i + 1)
            } else {
                rater.name().to_string()
            };
            let call = RaterCall {
                run_id: &req.run_id,
                item_id: &item.id,
                dimension_key: &item.dimension_key,
                max_points: item.max_points,
                rater_index: i,
                prompt: &prompt,
            };
            async move {
                let reply = timeout(self.per_call_timeout, rater.rate(&call)).await;
                score_reply(label, reply, item, &req.run_id, self.per_call_timeout)
            }
        });
        let scores = join_all(calls).await;

        let values: Vec<f64> = scores.iter().map(|s| s.score).collect();
        let mut consensus = stats::consensus(&values);
        // Summation rounding may push the mean an ulp past the bound.
        consensus.raw_score = consensus.raw_score.clamp(0.0, item.max_points);
        tracing::debug!(
            run_id = %req.run_id,
            item_id = %item.id,
            raw_score = consensus.raw_score,
            agreement = consensus.agreement,
            "item rated"
        );

        ScoredItem {
            id: item.id.clone(),
            dimension_key: item.dimension_key.clone(),
            max_points: item.max_points,
            scores,
            consensus,
        }
    }
}

fn score_reply(
    rater: String,
    reply: Result<anyhow::Result<String>, tokio::time::error::Elapsed>,
    item: &RatingItem,
    run_id: &str,
    limit: Duration,
) -> RaterScore {
    let raw = match reply {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            tracing::warn!(run_id, item_id = %item.id, rater = %rater, error = %e, "rater call failed");
            return fallback(rater, format!("rater call failed: {:#}", e), ScoreStatus::CallFailed);
        }
        Err(_) => {
            tracing::warn!(run_id, item_id = %item.id, rater = %rater, "rater call timed out");
            return fallback(
                rater,
                format!("rater call timed out after {}ms", limit.as_millis()),
                ScoreStatus::CallFailed,
            );
        }
    };

    match parse_reply(&raw) {
        RaterReply::Ok {
            score,
            notes,
            evidence_flags,
        } => {
            let clamped = clamp_score(score, item.max_points);
            let status = if clamped == score {
                ScoreStatus::Parsed
            } else {
                tracing::debug!(item_id = %item.id, rater = %rater, score, clamped, "score clamped");
                ScoreStatus::Clamped
            };
            RaterScore {
                rater,
                score: clamped,
                notes,
                evidence_flags,
                status,
            }
        }
        RaterReply::Malformed { reason, .. } => {
            tracing::warn!(run_id, item_id = %item.id, rater = %rater, reason = %reason, "malformed rater reply");
            fallback(rater, PARSE_FAILURE_NOTES.to_string(), ScoreStatus::Malformed)
        }
    }
}

fn fallback(rater: String, notes: String, status: ScoreStatus) -> RaterScore {
    RaterScore {
        rater,
        score: 0.0,
        notes,
        evidence_flags: BTreeSet::new(),
        status,
    }
}

pub fn clamp_score(score: f64, max_points: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, max_points)
}

fn validate_request(req: &RatingRequest) -> Result<(), OrchestrationError> {
    let invalid = |msg: String| Err(OrchestrationError::validation(Stage::Judge, msg));
    if req.run_id.trim().is_empty() {
        return invalid("run_id cannot be empty".into());
    }
    if req.tool_id.trim().is_empty() || req.tool_version.trim().is_empty() {
        return invalid("tool_id and tool_version are required".into());
    }
    if req.items.is_empty() {
        return invalid("items cannot be empty".into());
    }
    if req.num_raters < 1 {
        return invalid("num_raters must be >= 1".into());
    }
    let mut ids = HashSet::new();
    for item in &req.items {
        if item.id.trim().is_empty() {
            return invalid("rating item id cannot be empty".into());
        }
        if !ids.insert(item.id.as_str()) {
            return invalid(format!("duplicate rating item id '{}'", item.id));
        }
        if item.dimension_key.trim().is_empty() {
            return invalid(format!("item '{}' has no dimension_key", item.id));
        }
        if item.rubric.trim().is_empty() {
            return invalid(format!("item '{}' has an empty rubric", item.id));
        }
        if !(item.max_points.is_finite() && item.max_points > 0.0) {
            return invalid(format!("item '{}' must have positive max_points", item.id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EvidenceBundle;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replies are popped per call in arrival order.
    struct MockRater {
        name: String,
        replies: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl MockRater {
        fn new(name: &str, replies: Vec<&str>) -> Arc<Self> {
            let mut replies: Vec<String> = replies.into_iter().map(String::from).collect();
            replies.reverse();
            Arc::new(Self {
                name: name.into(),
                replies: Mutex::new(replies),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Rater for MockRater {
        async fn rate(&self, _call: &RaterCall<'_>) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("mock exhausted"))
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    struct HangingRater;

    #[async_trait]
    impl Rater for HangingRater {
        async fn rate(&self, _call: &RaterCall<'_>) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    fn reply(score: f64, flags: &[&str]) -> String {
        serde_json::json!({ "score": score, "notes": "n", "evidence_flags": flags }).to_string()
    }

    fn item(id: &str) -> RatingItem {
        RatingItem {
            id: id.into(),
            dimension_key: "linear_thinking".into(),
            max_points: 10.0,
            rubric: "numbered steps".into(),
            evidence: EvidenceBundle {
                output_text: Some("1. do a thing".into()),
                ..EvidenceBundle::default()
            },
        }
    }

    fn request(items: Vec<RatingItem>, num_raters: u32) -> RatingRequest {
        let requested_items = items.len();
        RatingRequest {
            run_id: "run-1".into(),
            tool_id: "chatbot".into(),
            tool_version: "2.1".into(),
            items,
            num_raters,
            requested_items,
        }
    }

    fn three_raters(a: Vec<&str>, b: Vec<&str>, c: Vec<&str>) -> Vec<Arc<dyn Rater>> {
        vec![
            MockRater::new("a", a) as Arc<dyn Rater>,
            MockRater::new("b", b),
            MockRater::new("c", c),
        ]
    }

    #[tokio::test]
    async fn unanimous_raters_give_full_agreement() {
        let r7 = reply(7.0, &["chunking"]);
        let rater = ConsensusRater::new(three_raters(vec![r7.as_str()], vec![r7.as_str()], vec![r7.as_str()]), 1_000);
        let res = rater.rate(&request(vec![item("t1")], 3)).await.unwrap();

        let c = res.scored[0].consensus;
        assert_eq!(c.raw_score, 7.0);
        assert_eq!(c.agreement, 1.0);
        assert_eq!(
            stats::all_evidence_flags(&res.scored),
            BTreeSet::from(["chunking".to_string()])
        );
    }

    #[tokio::test]
    async fn split_raters_give_zero_agreement() {
        let (r10, r0) = (reply(10.0, &[]), reply(0.0, &[]));
        let rater = ConsensusRater::new(three_raters(vec![r10.as_str()], vec![r0.as_str()], vec![r10.as_str()]), 1_000);
        let res = rater.rate(&request(vec![item("t1")], 3)).await.unwrap();

        let c = res.scored[0].consensus;
        assert!((c.raw_score - 6.6667).abs() < 1e-3);
        assert_eq!(c.agreement, 0.0);
    }

    #[tokio::test]
    async fn malformed_and_out_of_range_replies_degrade() {
        let over = reply(14.0, &[]);
        let rater = ConsensusRater::new(
            three_raters(vec![over.as_str()], vec!["seven out of ten"], vec!["{\"score\": -2, \"notes\": \"x\", \"evidence_flags\": []}"]),
            1_000,
        );
        let res = rater.rate(&request(vec![item("t1")], 3)).await.unwrap();
        let scores = &res.scored[0].scores;

        assert_eq!(scores[0].score, 10.0);
        assert_eq!(scores[0].status, ScoreStatus::Clamped);
        assert_eq!(scores[1].score, 0.0);
        assert_eq!(scores[1].notes, PARSE_FAILURE_NOTES);
        assert_eq!(scores[1].status, ScoreStatus::Malformed);
        assert!(scores[1].evidence_flags.is_empty());
        assert_eq!(scores[2].score, 0.0);
        assert_eq!(scores[2].status, ScoreStatus::Clamped);
        assert!(res.scored[0].consensus.raw_score <= 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn each_rater_has_its_own_timeout() {
        let r6 = reply(6.0, &[]);
        let raters: Vec<Arc<dyn Rater>> = vec![
            MockRater::new("fast", vec![r6.as_str()]),
            Arc::new(HangingRater),
        ];
        let rater = ConsensusRater::new(raters, 250);
        let res = rater.rate(&request(vec![item("t1")], 2)).await.unwrap();
        let scores = &res.scored[0].scores;

        assert_eq!(scores[0].score, 6.0);
        assert_eq!(scores[1].status, ScoreStatus::CallFailed);
        assert!(scores[1].notes.contains("timed out after 250ms"));
        assert_eq!(res.scored[0].consensus.raw_score, 3.0);
    }

    #[tokio::test]
    async fn fewer_raters_than_slots_cycle_with_labels() {
        let r5 = reply(5.0, &[]);
        let mock = MockRater::new("solo", vec![r5.as_str(), r5.as_str(), r5.as_str()]);
        let rater = ConsensusRater::new(vec![mock.clone() as Arc<dyn Rater>], 1_000);
        let res = rater.rate(&request(vec![item("t1")], 3)).await.unwrap();

        assert_eq!(mock.calls.load(Ordering::SeqCst), 3);
        let labels: Vec<_> = res.scored[0].scores.iter().map(|s| s.rater.as_str()).collect();
        assert_eq!(labels, vec!["solo#1", "solo#2", "solo#3"]);
    }

    #[tokio::test]
    async fn invalid_request_fails_before_any_call() {
        let mock = MockRater::new("a", vec![]);
        let rater = ConsensusRater::new(vec![mock.clone() as Arc<dyn Rater>], 1_000);

        let mut bad = item("t1");
        bad.max_points = 0.0;
        for req in [
            request(vec![], 3),
            request(vec![item("t1")], 0),
            request(vec![bad], 1),
        ] {
            let err = rater.rate(&req).await.unwrap_err();
            assert!(err.is_validation());
            assert_eq!(err.stage, Stage::Judge);
        }
        assert_eq!(mock.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn coverage_reflects_requested_items() {
        let r5 = reply(5.0, &[]);
        let rater = ConsensusRater::new(vec![MockRater::new("a", vec![r5.as_str()]) as Arc<dyn Rater>], 1_000);
        let mut req = request(vec![item("t1")], 1);
        req.requested_items = 4;
        let res = rater.rate(&req).await.unwrap();
        assert_eq!(res.coverage, Coverage { tested: 1, total: 4 });
    }

    fn run_blocking<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
            .block_on(fut)
    }

    proptest::proptest! {
        #[test]
        fn consensus_never_leaves_item_bounds(
            scores in proptest::collection::vec(
                proptest::prop_oneof![proptest::num::f64::ANY, -50.0f64..150.0],
                1..6,
            ),
            max_points in 0.5f64..100.0,
        ) {
            let replies: Vec<String> = scores.iter().map(|s| reply(*s, &[])).collect();
            let raters: Vec<Arc<dyn Rater>> = replies
                .iter()
                .enumerate()
                .map(|(i, r)| MockRater::new(&format!("r{}", i), vec![r.as_str()]) as Arc<dyn Rater>)
                .collect();
            let rater = ConsensusRater::new(raters, 1_000);
            let mut it = item("t1");
            it.max_points = max_points;
            let res = run_blocking(rater.rate(&request(vec![it], scores.len() as u32))).unwrap();

            let scored = &res.scored[0];
            for s in &scored.scores {
                proptest::prop_assert!((0.0..=max_points).contains(&s.score), "rater score {}", s.score);
            }
            let c = scored.consensus;
            proptest::prop_assert!((0.0..=max_points).contains(&c.raw_score), "consensus {}", c.raw_score);
            proptest::prop_assert!((0.0..=1.0).contains(&c.agreement));
        }
    }

    #[test]
    fn clamp_handles_nan_and_bounds() {
        assert_eq!(clamp_score(f64::NAN, 10.0), 0.0);
        assert_eq!(clamp_score(-1.0, 10.0), 0.0);
        assert_eq!(clamp_score(11.0, 10.0), 10.0);
        assert_eq!(clamp_score(3.5, 10.0), 3.5);
    }
}

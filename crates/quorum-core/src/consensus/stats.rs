//! Consensus statistics over rater scores.

use crate::model::{ConsensusScore, Coverage, ScoredItem};
use std::collections::BTreeSet;

/// Overall agreement at or above this is considered trustworthy.
pub const ACCEPTABLE_AGREEMENT: f64 = 0.7;

pub fn mean(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

/// Population standard deviation.
pub fn std_dev(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let m = mean(scores);
    let var = scores.iter().map(|s| (s - m).powi(2)).sum::<f64>() / scores.len() as f64;
    var.sqrt()
}

/// `max(0, 1 - 2·CV)` with CV = stdDev / mean.
///
/// Identical scores are exactly 1.0 (including all zeros). A zero mean with
/// differing scores is 0.
pub fn agreement(scores: &[f64]) -> f64 {
    let Some(first) = scores.first() else {
        return 0.0;
    };
    if scores.iter().all(|s| s == first) {
        return 1.0;
    }
    let m = mean(scores);
    if m == 0.0 {
        return 0.0;
    }
    let cv = std_dev(scores) / m.abs();
    (1.0 - 2.0 * cv).clamp(0.0, 1.0)
}

pub fn consensus(scores: &[f64]) -> ConsensusScore {
    ConsensusScore {
        raw_score: mean(scores),
        agreement: agreement(scores),
    }
}

/// Mean of per-item agreements; 0 when nothing was scored.
pub fn average_agreement(items: &[ScoredItem]) -> f64 {
    let values: Vec<f64> = items.iter().map(|i| i.consensus.agreement).collect();
    mean(&values)
}

pub fn has_acceptable_agreement(items: &[ScoredItem]) -> bool {
    !items.is_empty() && average_agreement(items) >= ACCEPTABLE_AGREEMENT
}

/// Union of every flag any rater attached to any item.
pub fn all_evidence_flags(items: &[ScoredItem]) -> BTreeSet<String> {
    items
        .iter()
        .flat_map(|i| i.scores.iter())
        .flat_map(|s| s.evidence_flags.iter().cloned())
        .collect()
}

/// Confidence handed to the publisher: mean agreement scaled by coverage.
pub fn confidence(items: &[ScoredItem], coverage: Coverage) -> f64 {
    (average_agreement(items) * coverage.ratio()).clamp(0.0, 1.0)
}

use crate::config::DimensionConfig;
use crate::model::{AggregateResult, PreviousPublication};
use std::collections::BTreeMap;

/// Dimension moves smaller than this are not reported.
pub const MIN_REPORTED_DELTA: f64 = 1.0;
const MAX_LISTED: usize = 3;

pub fn first_publication(current: &AggregateResult) -> String {
    let n = current.badges.len();
    format!(
        "First publication: composite {:.1}. Earned {} badge{}.",
        current.composite,
        n,
        plural(n)
    )
}

/// Textual comparison against the previous publication.
pub fn summarize(
    current: &AggregateResult,
    previous: &PreviousPublication,
    dimensions: &[DimensionConfig],
) -> Result<String, String> {
    let prev = previous
        .composite
        .ok_or_else(|| "previous publication has no composite".to_string())?;
    if !prev.is_finite() {
        return Err(format!("previous composite is not finite: {}", prev));
    }

    let delta = current.composite - prev;
    let mut parts = vec![format!(
        "Composite {:.1} -> {:.1} ({})",
        prev,
        current.composite,
        signed(delta)
    )];

    let earned: Vec<&str> = current
        .badges
        .iter()
        .filter(|b| !previous.badges.contains(b))
        .map(String::as_str)
        .collect();
    let lost: Vec<&str> = previous
        .badges
        .iter()
        .filter(|b| !current.badges.contains(b))
        .map(String::as_str)
        .collect();
    let (before, after) = (previous.badges.len(), current.badges.len());
    parts.push(format!(
        "Badges {} -> {} ({:+})",
        before,
        after,
        after as i64 - before as i64
    ));
    if !earned.is_empty() {
        parts.push(format!("Earned: {}", earned.join(", ")));
    }
    if !lost.is_empty() {
        parts.push(format!("Lost: {}", lost.join(", ")));
    }

    let before: BTreeMap<&str, f64> = previous
        .dimension_scores
        .iter()
        .map(|d| (d.dimension_key.as_str(), d.raw))
        .collect();
    let mut moves: Vec<(&str, f64)> = Vec::new();
    for agg in &current.breakdown {
        let Some(old) = before.get(agg.dimension_key.as_str()) else {
            continue;
        };
        let d = agg.raw - old;
        if !d.is_finite() {
            return Err(format!("non-finite delta for '{}'", agg.dimension_key));
        }
        if d.abs() >= MIN_REPORTED_DELTA {
            let name = dimensions
                .iter()
                .find(|c| c.key == agg.dimension_key)
                .map(|c| c.name.as_str())
                .unwrap_or(agg.dimension_key.as_str());
            moves.push((name, d));
        }
    }

    let mut improved: Vec<_> = moves.iter().filter(|(_, d)| *d > 0.0).collect();
    improved.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut regressed: Vec<_> = moves.iter().filter(|(_, d)| *d < 0.0).collect();
    regressed.sort_by(|a, b| a.1.total_cmp(&b.1));

    if !improved.is_empty() {
        parts.push(format!("Improved: {}", listing(&improved)));
    }
    if !regressed.is_empty() {
        parts.push(format!("Regressed: {}", listing(&regressed)));
    }
    Ok(format!("{}.", parts.join(". ")))
}

fn listing(moves: &[&(&str, f64)]) -> String {
    moves
        .iter()
        .take(MAX_LISTED)
        .map(|(name, d)| format!("{} {}", name, signed(*d)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn signed(v: f64) -> String {
    if v >= 0.0 {
        format!("+{:.1}", v)
    } else {
        format!("{:.1}", v)
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

//! Declarative badge predicates.
//!
//! A badge is earned when its predicate holds over the current dimension
//! score map and evidence flag set. Nothing is carried over from earlier
//! publications.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BadgeRule {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub when: BadgePredicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BadgePredicate {
    /// Raw dimension score at or above a threshold. Absent dimensions fail.
    MinScore { dimension: String, at_least: f64 },
    HasFlag { flag: String },
    All { of: Vec<BadgePredicate> },
    Any { of: Vec<BadgePredicate> },
    Not { predicate: Box<BadgePredicate> },
}

impl BadgePredicate {
    pub fn evaluate(&self, scores: &BTreeMap<String, f64>, flags: &BTreeSet<String>) -> bool {
        match self {
            BadgePredicate::MinScore {
                dimension,
                at_least,
            } => scores.get(dimension).is_some_and(|s| *s >= *at_least),
            BadgePredicate::HasFlag { flag } => flags.contains(flag),
            BadgePredicate::All { of } => of.iter().all(|p| p.evaluate(scores, flags)),
            BadgePredicate::Any { of } => of.iter().any(|p| p.evaluate(scores, flags)),
            BadgePredicate::Not { predicate } => !predicate.evaluate(scores, flags),
        }
    }

    /// Every dimension key referenced anywhere in the predicate tree.
    pub fn dimensions(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_dimensions(&mut out);
        out
    }

    fn collect_dimensions<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            BadgePredicate::MinScore { dimension, .. } => out.push(dimension.as_str()),
            BadgePredicate::HasFlag { .. } => {}
            BadgePredicate::All { of } | BadgePredicate::Any { of } => {
                for p in of {
                    p.collect_dimensions(out);
                }
            }
            BadgePredicate::Not { predicate } => predicate.collect_dimensions(out),
        }
    }
}

/// Keys of every rule whose predicate holds, in rule order.
pub fn assign_badges(
    rules: &[BadgeRule],
    scores: &BTreeMap<String, f64>,
    flags: &BTreeSet<String>,
) -> Vec<String> {
    rules
        .iter()
        .filter(|r| r.when.evaluate(scores, flags))
        .map(|r| r.key.clone())
        .collect()
}

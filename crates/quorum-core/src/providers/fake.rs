use crate::consensus::{Rater, RaterCall};
use crate::executor::{ExecutionContext, ItemExecutor};
use crate::model::{ExecutionOutput, WorkItem};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Deterministic executor for dry runs: echoes the item back.
#[derive(Debug, Default)]
pub struct FakeExecutor {
    failing: HashSet<String>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items with these ids fail on every attempt.
    pub fn failing(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.failing.extend(ids.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl ItemExecutor for FakeExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        item: &WorkItem,
    ) -> anyhow::Result<ExecutionOutput> {
        if self.failing.contains(&item.id) {
            anyhow::bail!("fake executor configured to fail '{}'", item.id);
        }
        Ok(ExecutionOutput {
            output: format!(
                "[fake {} {}] {}: {}",
                ctx.tool_id,
                ctx.tool_version,
                item.kind.as_str(),
                item.input
            ),
            evidence_refs: vec![format!("fake://{}/{}", ctx.run_id, item.id)],
            tokens_used: Some(item.input.split_whitespace().count() as u64),
            cost_usd: Some(0.0),
        })
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Deterministic rater. The score is a stable function of the item id, so
/// every rater of an item agrees unless `spread` is set.
#[derive(Debug, Clone)]
pub struct FakeRater {
    name: String,
    spread: f64,
    fixed_reply: Option<String>,
}

impl FakeRater {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spread: 0.0,
            fixed_reply: None,
        }
    }

    /// Fraction of `max_points` that odd-indexed raters deviate by.
    pub fn with_spread(mut self, spread: f64) -> Self {
        self.spread = spread;
        self
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.fixed_reply = Some(reply.into());
        self
    }
}

fn unit_hash(key: &str) -> f64 {
    let digest = Sha256::digest(key.as_bytes());
    f64::from(u16::from_be_bytes([digest[0], digest[1]])) / f64::from(u16::MAX)
}

#[async_trait]
impl Rater for FakeRater {
    async fn rate(&self, call: &RaterCall<'_>) -> anyhow::Result<String> {
        if let Some(reply) = &self.fixed_reply {
            return Ok(reply.clone());
        }
        let base = 0.5 + 0.5 * unit_hash(call.item_id);
        let jitter = if call.rater_index % 2 == 1 {
            -self.spread
        } else {
            0.0
        };
        let score = (((base + jitter) * call.max_points) * 10.0).round() / 10.0;
        let flags: Vec<&str> = if base >= 0.8 {
            vec![call.item_id]
        } else {
            vec![]
        };
        Ok(serde_json::json!({
            "score": score,
            "notes": format!("fake rating for {}", call.item_id),
            "evidence_flags": flags,
        })
        .to_string())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

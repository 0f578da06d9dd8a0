//! Batch execution of work items against the tool under test.
//!
//! The collaborator only ever sees one [`WorkItem`] at a time. The
//! [`BatchRunner`] owns pacing, concurrency, per-call timeouts and retries,
//! and guarantees exactly one [`ExecutionItem`] per requested item, in
//! request order, whatever the collaborator does.

mod retry;

pub use retry::backoff_delay;

use crate::clock::{Clock, SystemClock};
use crate::config::MAX_PARALLEL;
use crate::errors::{OrchestrationError, Stage};
use crate::model::{
    ExecutionItem, ExecutionOutput, ExecutionRequest, ExecutionResult, ExecutionSummary,
    RunnerSettings, WorkItem,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration, Instant};

/// Identity of the run an item belongs to; handed to every call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    pub run_id: String,
    pub tool_id: String,
    pub tool_version: String,
    pub site: Option<String>,
}

#[async_trait]
pub trait ItemExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        item: &WorkItem,
    ) -> anyhow::Result<ExecutionOutput>;

    fn name(&self) -> &'static str;
}

#[derive(Clone)]
pub struct BatchRunner {
    executor: Arc<dyn ItemExecutor>,
    clock: Arc<dyn Clock>,
}

impl BatchRunner {
    pub fn new(executor: Arc<dyn ItemExecutor>) -> Self {
        Self {
            executor,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn run(&self, req: &ExecutionRequest) -> Result<ExecutionResult, OrchestrationError> {
        validate_request(req)?;
        let started_at = self.clock.now();
        let settings = req.settings.clone();
        let ctx = Arc::new(ExecutionContext {
            run_id: req.run_id.clone(),
            tool_id: req.tool_id.clone(),
            tool_version: req.tool_version.clone(),
            site: req.site.clone(),
        });

        tracing::info!(
            run_id = %req.run_id,
            tool = %req.tool_id,
            items = req.items.len(),
            parallel = settings.parallel,
            executor = self.executor.name(),
            "executing batch"
        );

        let sem = Arc::new(Semaphore::new(settings.parallel));
        let pace = dispatch_interval(&settings);
        let mut join_set = JoinSet::new();

        for (idx, item) in req.items.iter().enumerate() {
            if idx > 0 {
                if let Some(pace) = pace {
                    tokio::time::sleep(pace).await;
                }
            }
            let permit = match sem.clone().acquire_owned().await {
                Ok(p) => p,
                Err(e) => {
                    return Err(OrchestrationError::validation(
                        Stage::Runner,
                        format!("executor pool closed: {}", e),
                    ))
                }
            };
            let executor = self.executor.clone();
            let ctx = ctx.clone();
            let item = item.clone();
            let settings = settings.clone();
            join_set.spawn(async move {
                let _permit = permit;
                let row = execute_with_retries(executor.as_ref(), &ctx, &item, &settings).await;
                (idx, row)
            });
        }

        let mut slots: Vec<Option<ExecutionItem>> = vec![None; req.items.len()];
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok((idx, row)) => slots[idx] = Some(row),
                Err(e) => tracing::warn!(run_id = %req.run_id, error = %e, "execution task aborted"),
            }
        }

        let items: Vec<ExecutionItem> = slots
            .into_iter()
            .zip(req.items.iter())
            .map(|(slot, item)| {
                slot.unwrap_or_else(|| failed_item(item, 0, 0, "execution task aborted".into()))
            })
            .collect();

        let summary = summarize(&items);
        tracing::info!(
            run_id = %req.run_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            total_cost_usd = summary.total_cost_usd,
            "batch finished"
        );

        Ok(ExecutionResult {
            run_id: req.run_id.clone(),
            tool_id: req.tool_id.clone(),
            tool_version: req.tool_version.clone(),
            started_at,
            finished_at: self.clock.now(),
            items,
            summary,
        })
    }
}

/// Delay between consecutive dispatches for a requests-per-minute cap.
pub fn dispatch_interval(settings: &RunnerSettings) -> Option<Duration> {
    settings
        .rate_limit_per_min
        .filter(|rpm| *rpm > 0)
        .map(|rpm| Duration::from_millis(60_000 / u64::from(rpm)))
}

async fn execute_with_retries(
    executor: &dyn ItemExecutor,
    ctx: &ExecutionContext,
    item: &WorkItem,
    settings: &RunnerSettings,
) -> ExecutionItem {
    let per_call = Duration::from_millis(settings.per_call_timeout_ms);
    let max_attempts = settings.retries.saturating_add(1);
    let mut last_error = String::new();
    let mut last_latency = 0;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(attempt - 1)).await;
        }
        let started = Instant::now();
        let outcome = timeout(per_call, executor.execute(ctx, item)).await;
        last_latency = elapsed_ms(started);

        match outcome {
            Ok(Ok(out)) => {
                return ExecutionItem {
                    id: item.id.clone(),
                    kind: item.kind,
                    input: item.input.clone(),
                    output: out.output,
                    evidence_refs: out.evidence_refs,
                    latency_ms: last_latency,
                    tokens_used: out.tokens_used,
                    cost_usd: out.cost_usd,
                    attempts: attempt + 1,
                    error: None,
                };
            }
            Ok(Err(e)) => last_error = format!("{:#}", e),
            Err(_) => last_error = format!("timed out after {}ms", settings.per_call_timeout_ms),
        }
        tracing::warn!(
            run_id = %ctx.run_id,
            item_id = %item.id,
            attempt = attempt + 1,
            max_attempts,
            error = %last_error,
            "item attempt failed"
        );
    }

    failed_item(item, last_latency, max_attempts, last_error)
}

fn failed_item(item: &WorkItem, latency_ms: u64, attempts: u32, error: String) -> ExecutionItem {
    ExecutionItem {
        id: item.id.clone(),
        kind: item.kind,
        input: item.input.clone(),
        output: String::new(),
        evidence_refs: Vec::new(),
        latency_ms,
        tokens_used: None,
        cost_usd: None,
        attempts,
        error: Some(error),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub fn summarize(items: &[ExecutionItem]) -> ExecutionSummary {
    let failed = items.iter().filter(|i| i.is_error()).count();
    let total_latency: u64 = items.iter().map(|i| i.latency_ms).sum();
    ExecutionSummary {
        total: items.len(),
        succeeded: items.len() - failed,
        failed,
        total_cost_usd: items.iter().filter_map(|i| i.cost_usd).sum(),
        total_tokens: items.iter().filter_map(|i| i.tokens_used).sum(),
        mean_latency_ms: if items.is_empty() {
            0.0
        } else {
            total_latency as f64 / items.len() as f64
        },
    }
}

fn validate_request(req: &ExecutionRequest) -> Result<(), OrchestrationError> {
    let invalid = |msg: String| Err(OrchestrationError::validation(Stage::Runner, msg));
    if req.run_id.trim().is_empty() {
        return invalid("run_id cannot be empty".into());
    }
    if req.tool_id.trim().is_empty() || req.tool_version.trim().is_empty() {
        return invalid("tool_id and tool_version are required".into());
    }
    if req.items.is_empty() {
        return invalid("items cannot be empty".into());
    }
    let mut seen = HashSet::new();
    for item in &req.items {
        if item.id.trim().is_empty() {
            return invalid("item id cannot be empty".into());
        }
        if !seen.insert(item.id.as_str()) {
            return invalid(format!("duplicate item id '{}'", item.id));
        }
    }
    if req.settings.parallel == 0 || req.settings.parallel > MAX_PARALLEL {
        return invalid(format!("parallel must be between 1 and {}", MAX_PARALLEL));
    }
    if req.settings.per_call_timeout_ms == 0 {
        return invalid("per_call_timeout_ms must be > 0".into());
    }
    if req.settings.rate_limit_per_min == Some(0) {
        return invalid("rate_limit_per_min must be > 0 when set".into());
    }
    Ok(())
}

//! Stage sequencing: watcher, runner, judge, publisher.
//!
//! A [`Coordinator`] drives one [`PipelineRun`] through the stages, derives
//! each stage's request from the previous stage's result, and persists a
//! snapshot after every transition. The first stage failure halts the run,
//! is escalated and stored on the run record.

pub mod build;
mod trigger;

pub use trigger::{SignalDisposition, TriggeredPipeline};

use crate::clock::{Clock, SystemClock};
use crate::config::BenchConfig;
use crate::consensus::{ConsensusRater, Rater};
use crate::errors::{OrchestrationError, Stage, StoreError};
use crate::executor::{BatchRunner, ItemExecutor};
use crate::model::{FusionEvent, PipelineRun, PreviousPublication, RunStage, SourceKind};
use crate::publish::Publisher;
use crate::storage::RunStore;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error(transparent)]
    Rejected(#[from] OrchestrationError),
}

pub struct Coordinator {
    config: Arc<BenchConfig>,
    runner: BatchRunner,
    rater: ConsensusRater,
    publisher: Publisher,
    store: Arc<dyn RunStore>,
    clock: Arc<dyn Clock>,
    checkpoints: bool,
}

impl Coordinator {
    pub fn new(
        config: Arc<BenchConfig>,
        executor: Arc<dyn ItemExecutor>,
        raters: Vec<Arc<dyn Rater>>,
        store: Arc<dyn RunStore>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            runner: BatchRunner::new(executor).with_clock(clock.clone()),
            rater: ConsensusRater::new(raters, config.settings.per_call_timeout_ms),
            publisher: Publisher::new(config.clone()),
            config,
            store,
            clock,
            checkpoints: true,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.runner = self.runner.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    /// Only persist terminal snapshots when disabled.
    pub fn with_checkpoints(mut self, enabled: bool) -> Self {
        self.checkpoints = enabled;
        self
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Run the full pipeline for one fusion event.
    ///
    /// Stage failures do not surface as `Err`: the returned run is in the
    /// `failed` stage and carries the escalated error. `Err` means the
    /// terminal snapshot could not be persisted.
    pub async fn run_event(&self, event: FusionEvent) -> Result<PipelineRun, PipelineError> {
        let now = self.clock.now();
        let run = PipelineRun {
            run_id: format!("run-{}", uuid::Uuid::new_v4()),
            stage: RunStage::Watcher,
            subject_id: event.subject_id.clone(),
            version_hint: event.version_hint.clone(),
            config_digest: self.config.digest(),
            fusion_event: Some(event),
            execution_request: None,
            execution_result: None,
            rating_request: None,
            rating_result: None,
            publish_input: None,
            publish_output: None,
            error: None,
            started_at: now,
            updated_at: now,
        };
        tracing::info!(
            run_id = %run.run_id,
            subject = %run.subject_id,
            version = %run.version_hint,
            "pipeline run started"
        );
        self.checkpoint(&run);
        self.drive(run).await
    }

    /// Operator-initiated run that bypasses fusion.
    pub async fn run_manual(
        &self,
        subject_id: &str,
        version_hint: &str,
        evidence: Vec<String>,
    ) -> Result<PipelineRun, PipelineError> {
        let event = FusionEvent {
            subject_id: subject_id.trim().to_string(),
            version_hint: version_hint.trim().to_string(),
            trigger: SourceKind::Manual,
            sources: vec![SourceKind::Manual],
            evidence,
            fused_at: self.clock.now(),
        };
        self.run_event(event).await
    }

    /// Continue a stored run.
    ///
    /// Completed runs are returned as stored. Failed runs restart the stage
    /// named in their error; every later payload is discarded. Runs that
    /// stopped between stages continue from the recorded stage.
    pub async fn resume(&self, run_id: &str) -> Result<PipelineRun, PipelineError> {
        let mut run = self
            .store
            .load(run_id)?
            .ok_or_else(|| PipelineError::RunNotFound(run_id.to_string()))?;

        match run.stage {
            RunStage::Completed => return Ok(run),
            RunStage::Failed => {
                let restart = run
                    .error
                    .as_ref()
                    .map(|e| restart_stage(e.stage))
                    .unwrap_or(RunStage::Watcher);
                reset_from(&mut run, restart);
                run.error = None;
                run.stage = restart;
            }
            _ => {}
        }

        if run.config_digest != self.config.digest() {
            tracing::warn!(
                run_id = %run.run_id,
                stored = %run.config_digest,
                current = %self.config.digest(),
                "resuming with a different configuration"
            );
            run.config_digest = self.config.digest();
        }
        tracing::info!(run_id = %run.run_id, stage = %run.stage, "resuming run");
        self.drive(run).await
    }

    async fn drive(&self, mut run: PipelineRun) -> Result<PipelineRun, PipelineError> {
        while !run.stage.is_terminal() {
            let stage = run.stage;
            let step = match stage {
                RunStage::Watcher => self.watch(&mut run),
                RunStage::Runner => self.execute(&mut run).await,
                RunStage::Judge => self.judge(&mut run).await,
                RunStage::Publisher => self.publish(&mut run),
                RunStage::Completed | RunStage::Failed => break,
            };
            run.updated_at = self.clock.now();
            match step {
                Ok(next) => {
                    tracing::debug!(run_id = %run.run_id, from = %stage, to = %next, "stage finished");
                    run.stage = next;
                    if !next.is_terminal() {
                        self.checkpoint(&run);
                    }
                }
                Err(e) => {
                    tracing::error!(run_id = %run.run_id, stage = %stage, error = %e, "stage failed");
                    run.error = Some(e.escalate());
                    run.stage = RunStage::Failed;
                }
            }
        }

        self.store.save(&run)?;
        match &run.publish_output {
            Some(out) if run.stage == RunStage::Completed => tracing::info!(
                run_id = %run.run_id,
                composite = out.aggregate.composite,
                confidence = out.aggregate.confidence,
                badges = out.aggregate.badges.len(),
                "pipeline run completed"
            ),
            _ => tracing::warn!(run_id = %run.run_id, stage = %run.stage, "pipeline run did not complete"),
        }
        Ok(run)
    }

    fn checkpoint(&self, run: &PipelineRun) {
        if !self.checkpoints {
            return;
        }
        if let Err(e) = self.store.save(run) {
            tracing::warn!(run_id = %run.run_id, stage = %run.stage, error = %e, "checkpoint save failed");
        }
    }

    fn watch(&self, run: &mut PipelineRun) -> Result<RunStage, OrchestrationError> {
        let event = run
            .fusion_event
            .as_ref()
            .ok_or_else(|| missing(Stage::Watcher, "fusion event"))?;
        run.execution_request = Some(build::execution_request(&self.config, &run.run_id, event)?);
        Ok(RunStage::Runner)
    }

    async fn execute(&self, run: &mut PipelineRun) -> Result<RunStage, OrchestrationError> {
        let request = run
            .execution_request
            .as_ref()
            .ok_or_else(|| missing(Stage::Runner, "execution request"))?;
        let result = self.runner.run(request).await?;
        let rating = build::rating_request(&self.config, &result)?;
        run.execution_result = Some(result);
        run.rating_request = Some(rating);
        Ok(RunStage::Judge)
    }

    async fn judge(&self, run: &mut PipelineRun) -> Result<RunStage, OrchestrationError> {
        let request = run
            .rating_request
            .as_ref()
            .ok_or_else(|| missing(Stage::Judge, "rating request"))?;
        let result = self.rater.rate(request).await?;
        let previous = self.previous_publication(&run.subject_id, &run.run_id);
        run.publish_input = Some(build::publish_input(
            &self.config,
            run.execution_result.as_ref(),
            &result,
            previous,
        ));
        run.rating_result = Some(result);
        Ok(RunStage::Publisher)
    }

    fn publish(&self, run: &mut PipelineRun) -> Result<RunStage, OrchestrationError> {
        let input = run
            .publish_input
            .as_ref()
            .ok_or_else(|| missing(Stage::Publisher, "publish input"))?;
        run.publish_output = Some(self.publisher.publish(input)?);
        Ok(RunStage::Completed)
    }

    /// Baseline for the diff: the newest completed run of the same subject.
    /// Lookup failures only cost the diff, never the run.
    fn previous_publication(&self, subject_id: &str, run_id: &str) -> Option<PreviousPublication> {
        match self.store.latest_completed(subject_id) {
            Ok(Some(prev)) if prev.run_id != run_id => {
                prev.publish_output.as_ref().map(|o| o.as_previous())
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(subject = %subject_id, error = %e, "previous publication lookup failed");
                None
            }
        }
    }
}

fn missing(stage: Stage, what: &str) -> OrchestrationError {
    OrchestrationError::validation(stage, format!("run has no {}", what))
}

fn restart_stage(stage: Stage) -> RunStage {
    match stage {
        Stage::Watcher | Stage::Coordinator => RunStage::Watcher,
        Stage::Runner => RunStage::Runner,
        Stage::Judge => RunStage::Judge,
        Stage::Publisher => RunStage::Publisher,
    }
}

/// Drop the payloads `stage` and later stages produce.
fn reset_from(run: &mut PipelineRun, stage: RunStage) {
    if matches!(stage, RunStage::Watcher) {
        run.execution_request = None;
    }
    if matches!(stage, RunStage::Watcher | RunStage::Runner) {
        run.execution_result = None;
        run.rating_request = None;
    }
    if matches!(stage, RunStage::Watcher | RunStage::Runner | RunStage::Judge) {
        run.rating_result = None;
        run.publish_input = None;
    }
    run.publish_output = None;
}

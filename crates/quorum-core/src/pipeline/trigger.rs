use super::{Coordinator, PipelineError};
use crate::fusion::{FusionOutcome, SignalAccumulator};
use crate::model::{PipelineRun, SourceKind};
use std::sync::Arc;

/// What a single incoming signal led to.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalDisposition {
    Pending { seen: usize, threshold: usize },
    Duplicate { source: SourceKind },
    Ran(Box<PipelineRun>),
}

/// Signals in, pipeline runs out: a fused event immediately starts a run.
pub struct TriggeredPipeline {
    accumulator: Arc<SignalAccumulator>,
    coordinator: Arc<Coordinator>,
}

impl TriggeredPipeline {
    pub fn new(accumulator: Arc<SignalAccumulator>, coordinator: Arc<Coordinator>) -> Self {
        Self {
            accumulator,
            coordinator,
        }
    }

    pub fn accumulator(&self) -> &SignalAccumulator {
        &self.accumulator
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Expired buckets are swept before the signal is recorded so a stale
    /// partial bucket never completes with a fresh signal.
    pub async fn signal(
        &self,
        subject_id: &str,
        version_hint: &str,
        source: SourceKind,
        evidence_ref: &str,
    ) -> Result<SignalDisposition, PipelineError> {
        self.accumulator.sweep_expired();
        let outcome = self
            .accumulator
            .record_signal(subject_id, version_hint, source, evidence_ref)?;
        match outcome {
            FusionOutcome::Pending { seen, threshold } => {
                Ok(SignalDisposition::Pending { seen, threshold })
            }
            FusionOutcome::Duplicate { source } => Ok(SignalDisposition::Duplicate { source }),
            FusionOutcome::Fused(event) => {
                let run = self.coordinator.run_event(event).await?;
                Ok(SignalDisposition::Ran(Box::new(run)))
            }
        }
    }
}

pub mod clock;
pub mod config;
pub mod consensus;
pub mod errors;
pub mod executor;
pub mod fusion;
pub mod model;
pub mod pipeline;
pub mod providers;
pub mod publish;
pub mod report;
pub mod storage;

// Convenience re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, parse_config, write_sample_config, BenchConfig};
pub use consensus::{ConsensusRater, Rater, RaterCall};
pub use errors::{ConfigError, ErrorKind, OrchestrationError, Stage, StoreError};
pub use executor::{BatchRunner, ExecutionContext, ItemExecutor};
pub use fusion::{FusionOutcome, SignalAccumulator};
pub use pipeline::{Coordinator, PipelineError, SignalDisposition, TriggeredPipeline};
pub use publish::Publisher;
pub use storage::{open_store, JsonFileRunStore, RunStore, RunSummary, SqliteRunStore};

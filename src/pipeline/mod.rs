pub mod cancel;
pub mod classifier; // One classifier call per unit, retries + reply salvage
pub mod orchestrator;
pub mod pairing; // Per-participant (tutor, learner) pair derivation
pub mod prompt;
pub mod reconcile; // Keyed merge of results onto base records
pub mod summary;
pub mod types;

pub use cancel::CancellationToken;
pub use orchestrator::{run_from_config, BatchOrchestrator, BatchOutcome, OrchestratorConfig};
pub use types::AnalysisMode;

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::{LoadError, WriteError};
use classifier::ClassificationError;

/// Errors that abort a batch. Per-unit classification failures never
/// surface here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to load interactions: {0}")]
    Load(#[from] LoadError),

    #[error("Failed to write enriched records: {0}")]
    Write(#[from] WriteError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Classifier setup failed: {0}")]
    ClassifierSetup(#[from] ClassificationError),

    #[error("A classification worker panicked while holding the result map")]
    ResultsPoisoned,
}

//! Error Types
//!
//! Failures surfaced by the engine, the checkpoint layer and the
//! pipeline definition loader.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a run or reject a pipeline operation.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A step's work returned `Err` or panicked and exceptions were not ignored.
    #[error("Exception occurred during step {step_id} (run_step_idx {position}):\n{diagnostic}")]
    StepFault {
        step_id: String,
        position: usize,
        diagnostic: String,
    },

    /// A step returned an `error` status and errors were not ignored.
    #[error("Error returned in step {step_id} (run_step_idx {position})")]
    StepErrorStatus { step_id: String, position: usize },

    /// The checkpoint could not be written and the caller asked for this to be fatal.
    #[error("Pipeline could not be saved to {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: CheckpointError,
    },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Duplicate step ID: '{0}'")]
    DuplicateStepId(String),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("Invalid pipeline definition: {0}")]
    Definition(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Position of the aborting unit in the working list, when the error came from a step.
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::StepFault { position, .. } | Self::StepErrorStatus { position, .. } => {
                Some(*position)
            }
            _ => None,
        }
    }
}

/// Errors raised while persisting or restoring pipeline state.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed pipeline state: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported pipeline state version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Work '{0}' is not registered")]
    UnknownWork(String),
}

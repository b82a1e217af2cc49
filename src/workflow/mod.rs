//! Pipeline Definition Module
//!
//! Provides data structures and utilities for defining, persisting and
//! loading pipelines.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Step, ConcurrentGroup, StepSequence)
//! - [`work`]: Work callables, their capabilities and the registry
//! - [`state`]: Checkpoint snapshots and the checkpointer
//! - [`parser`]: YAML parsing and loading
//! - [`validator`]: Validation rules for YAML definitions

pub mod model;
pub mod parser;
pub mod state;
pub mod validator;
pub mod work;

pub use model::{ConcurrentGroup, Status, Step, StepResult, StepSequence, Unit};
pub use parser::{load_pipeline, parse_pipeline, PipelineDefinition};
pub use state::{Checkpointer, JsonCheckpointer, PipelineState, STATE_VERSION};
pub use work::{
    GlobalState, Globals, Initializer, Needs, PipelineInfo, StepContext, Work, WorkError,
    WorkRegistry, WorkResult,
};

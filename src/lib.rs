//! Stepwise - Resumable Step Pipeline Engine
//!
//! Runs an ordered sequence of steps, some of which may be groups fanned out
//! over worker threads, checkpointing after every step so an interrupted run
//! can continue where it stopped.
//!
//! # Architecture
//!
//! The library is organized into five main modules:
//!
//! - [`workflow`]: Steps, groups, works and pipeline definitions
//! - [`execution`]: The run loop, error policy and worker pool
//! - [`environment`]: Named pipeline paths
//! - [`monitoring`]: Execution timeline of a run
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::{json, Map};
//! use stepwise::{ConcurrentGroup, Pipeline, RunOptions, Step, Work};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let reduce = Work::new("reduce", |ctx| {
//!         let night = ctx.arg("night").cloned().unwrap_or_default();
//!         Ok(json!({"status": "success", "night": night}))
//!     });
//!
//!     let mut pipeline = Pipeline::new().with_name("nightly");
//!     pipeline.add_work(reduce.clone(), ["calib"], false, false, Map::new())?;
//!
//!     let mut group = ConcurrentGroup::new().with_workers(4);
//!     for night in 1..=3 {
//!         group.add_step(Step::new(reduce.clone()).with_arg("night", night))?;
//!     }
//!     pipeline.add_step(group)?;
//!
//!     pipeline.run(RunOptions::new().ignore_tags(["calib"]))?;
//!     Ok(())
//! }
//! ```

pub mod environment;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use error::{CheckpointError, PipelineError};
pub use execution::engine::{Pipeline, RunOptions, RunReport};
pub use workflow::model::{ConcurrentGroup, Status, Step, StepResult, Unit};
pub use workflow::parser::load_pipeline;
pub use workflow::work::{GlobalState, Initializer, Work, WorkRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Stepwise";

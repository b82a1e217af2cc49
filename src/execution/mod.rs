//! Pipeline Execution Module
//!
//! Runs the units of a pipeline in order, with checkpointing and resume.
//!
//! # Architecture
//!
//! - [`engine`]: the [`Pipeline`] and its run loop
//! - [`step`]: single-step execution and the error policy
//! - `pool`: fan-out of a concurrent group over worker threads
//! - [`shell`]: the built-in `shell` work

pub mod engine;
mod pool;
pub mod shell;
pub mod step;

pub use engine::{Pipeline, RunOptions, RunReport};
pub use shell::SHELL_WORK_NAME;
pub use step::Policy;

//! Run Monitoring Module
//!
//! Tracks the execution timeline of a run.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: unit start/finish timing and the end-of-run summary

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};

//! Pipeline State Persistence
//!
//! Snapshot format written after every executed unit so that an
//! interrupted run can resume. Works are stored by name and resolved
//! against a [`WorkRegistry`] when the state is restored.
//!
//! [`JsonCheckpointer`] writes the snapshot as pretty-printed JSON to
//! `<log path>/pipeline.json` (or `pipeline-<run name>.json`).

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::model::{ConcurrentGroup, Step, StepResult, StepSequence, Unit};
use super::work::{GlobalState, WorkRegistry};
use crate::error::CheckpointError;

/// Version of the state format written by this crate.
pub const STATE_VERSION: u32 = 1;

/// Durable snapshot of a pipeline.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PipelineState {
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub paths: BTreeMap<String, PathBuf>,
    pub next_id: usize,
    #[serde(default)]
    pub globals: GlobalState,
    pub steps: Vec<UnitState>,
    #[serde(default)]
    pub run_steps: Option<Vec<UnitState>>,
    #[serde(default)]
    pub run_step_idx: usize,
    pub saved_at: DateTime<Utc>,
}

impl PipelineState {
    /// Fails unless the snapshot was written in the current format.
    pub fn check_version(&self) -> Result<(), CheckpointError> {
        if self.version != STATE_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: self.version,
                expected: STATE_VERSION,
            });
        }
        Ok(())
    }
}

/// Serialized form of a [`Unit`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitState {
    Step(StepState),
    Group(GroupState),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StepState {
    pub id: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub work: String,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    #[serde(default)]
    pub ignore_errors: bool,
    #[serde(default)]
    pub ignore_exceptions: bool,
    #[serde(default)]
    pub result: Option<StepResult>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GroupState {
    pub id: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub workers: usize,
    pub next_id: usize,
    #[serde(default)]
    pub initializer: Option<String>,
    pub steps: Vec<StepState>,
    #[serde(default)]
    pub result: Option<StepResult>,
}

impl From<&Step> for StepState {
    fn from(step: &Step) -> Self {
        Self {
            id: step.id.clone(),
            tags: step.tags.clone(),
            work: step.work.name().to_string(),
            kwargs: step.kwargs.clone(),
            ignore_errors: step.ignore_errors,
            ignore_exceptions: step.ignore_exceptions,
            result: step.result.clone(),
        }
    }
}

impl From<&ConcurrentGroup> for GroupState {
    fn from(group: &ConcurrentGroup) -> Self {
        Self {
            id: group.id.clone(),
            tags: group.tags.clone(),
            workers: group.worker_count,
            next_id: group.next_id,
            initializer: group.initializer.as_ref().map(|i| i.name().to_string()),
            steps: group.steps.iter().map(StepState::from).collect(),
            result: group.result.clone(),
        }
    }
}

impl From<&Unit> for UnitState {
    fn from(unit: &Unit) -> Self {
        match unit {
            Unit::Step(step) => Self::Step(step.into()),
            Unit::Group(group) => Self::Group(group.into()),
        }
    }
}

impl StepState {
    pub fn restore(self, registry: &WorkRegistry) -> Result<Step, CheckpointError> {
        let work = registry
            .get(&self.work)
            .cloned()
            .ok_or(CheckpointError::UnknownWork(self.work))?;

        Ok(Step {
            id: self.id,
            tags: self.tags,
            work,
            kwargs: self.kwargs,
            ignore_errors: self.ignore_errors,
            ignore_exceptions: self.ignore_exceptions,
            result: self.result,
        })
    }
}

impl GroupState {
    pub fn restore(self, registry: &WorkRegistry) -> Result<ConcurrentGroup, CheckpointError> {
        let initializer = match self.initializer {
            Some(name) => Some(
                registry
                    .initializer(&name)
                    .cloned()
                    .ok_or(CheckpointError::UnknownWork(name))?,
            ),
            None => None,
        };

        let steps = self
            .steps
            .into_iter()
            .map(|s| s.restore(registry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ConcurrentGroup {
            id: self.id,
            tags: self.tags,
            worker_count: self.workers.max(1),
            steps,
            next_id: self.next_id,
            initializer,
            result: self.result,
        })
    }
}

impl UnitState {
    pub fn restore(self, registry: &WorkRegistry) -> Result<Unit, CheckpointError> {
        Ok(match self {
            Self::Step(step) => Unit::Step(step.restore(registry)?),
            Self::Group(group) => Unit::Group(group.restore(registry)?),
        })
    }
}

pub(crate) fn snapshot_units(units: &[Unit]) -> Vec<UnitState> {
    units.iter().map(UnitState::from).collect()
}

pub(crate) fn restore_units(
    units: Vec<UnitState>,
    registry: &WorkRegistry,
) -> Result<Vec<Unit>, CheckpointError> {
    units.into_iter().map(|u| u.restore(registry)).collect()
}

pub(crate) fn restore_sequence(
    units: Vec<UnitState>,
    next_id: usize,
    registry: &WorkRegistry,
) -> Result<StepSequence, CheckpointError> {
    Ok(StepSequence::from_parts(restore_units(units, registry)?, next_id))
}

/// Persists and restores pipeline snapshots.
pub trait Checkpointer: Send + Sync {
    fn save(&self, state: &PipelineState, destination: &Path) -> Result<(), CheckpointError>;

    fn load(&self, path: &Path) -> Result<PipelineState, CheckpointError>;
}

/// Writes snapshots as pretty JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCheckpointer;

impl Checkpointer for JsonCheckpointer {
    fn save(&self, state: &PipelineState, destination: &Path) -> Result<(), CheckpointError> {
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(state)?;

        // Replace the previous checkpoint only once the new one is fully written
        let partial = destination.with_extension("json.partial");
        fs::write(&partial, json)?;
        fs::rename(&partial, destination)?;

        debug!("Saved pipeline state to {}", destination.display());
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<PipelineState, CheckpointError> {
        let content = fs::read_to_string(path)?;
        let state: PipelineState = serde_json::from_str(&content)?;
        state.check_version()?;

        info!(
            "Loaded pipeline state from {} (run_step_idx {})",
            path.display(),
            state.run_step_idx
        );
        Ok(state)
    }
}

/// Checkpoint file for a run inside the log directory.
pub fn checkpoint_file(log_dir: &Path, run_name: Option<&str>) -> PathBuf {
    match run_name {
        Some(name) => log_dir.join(format!("pipeline-{}.json", name)),
        None => log_dir.join("pipeline.json"),
    }
}

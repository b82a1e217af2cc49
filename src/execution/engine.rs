//! Pipeline Execution Engine
//!
//! The engine that drives a run:
//! - selects the working list (explicit, full snapshot, or resumed)
//! - filters it by run/ignore tags
//! - positions the run cursor
//! - dispatches each unit in order, single steps inline and groups on a
//!   worker pool
//! - checkpoints after every unit so an interrupted run can resume

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use log::{debug, error, info, warn};
use serde_json::{Map, Value};

use crate::environment::paths::{check_paths, LOG_PATH};
use crate::error::PipelineError;
use crate::monitoring::{EventType, ExecutionTimeline};
use crate::workflow::model::{Status, Step, StepSequence, Unit};
use crate::workflow::state::{
    checkpoint_file, restore_sequence, restore_units, snapshot_units, Checkpointer,
    JsonCheckpointer, PipelineState, STATE_VERSION,
};
use crate::workflow::work::{GlobalState, Work, WorkRegistry};

use super::step::{ExecEnv, Policy};

/// Options for a single [`Pipeline::run`] call.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Only run units carrying one of these tags (empty = all)
    pub run_tags: BTreeSet<String>,
    /// Never run units carrying one of these tags
    pub ignore_tags: BTreeSet<String>,
    /// Run exactly these units instead of the pipeline's steps
    pub run_steps: Option<Vec<Unit>>,
    /// Continue the previous working list from the saved cursor
    pub resume: bool,
    /// Override every step's `ignore_errors`
    pub ignore_errors: Option<bool>,
    /// Override every step's `ignore_exceptions`
    pub ignore_exceptions: Option<bool>,
    /// Start at this index of the working list
    pub start_idx: Option<usize>,
    /// Distinguishes checkpoint files of different runs
    pub run_name: Option<String>,
    /// Abort the run when a checkpoint cannot be written
    pub fail_on_checkpoint_error: bool,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn ignore_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn run_steps(mut self, units: Vec<Unit>) -> Self {
        self.run_steps = Some(units);
        self
    }

    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn ignore_errors(mut self, ignore: bool) -> Self {
        self.ignore_errors = Some(ignore);
        self
    }

    pub fn ignore_exceptions(mut self, ignore: bool) -> Self {
        self.ignore_exceptions = Some(ignore);
        self
    }

    pub fn start_idx(mut self, idx: usize) -> Self {
        self.start_idx = Some(idx);
        self
    }

    pub fn run_name(mut self, name: impl Into<String>) -> Self {
        self.run_name = Some(name.into());
        self
    }

    pub fn fail_on_checkpoint_error(mut self, fatal: bool) -> Self {
        self.fail_on_checkpoint_error = fatal;
        self
    }
}

/// Outcome of a run that completed every unit of its working list.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub status: Status,
    /// Identities of the units executed by this call, in order
    pub executed: Vec<String>,
}

/// A resumable sequence of steps.
///
/// # Example
///
/// ```
/// use serde_json::{json, Map};
/// use stepwise::execution::{Pipeline, RunOptions};
/// use stepwise::workflow::{Status, Work};
///
/// let mut pipeline = Pipeline::new().with_name("demo");
/// let work = Work::new("hello", |_| Ok(json!({"status": "success"})));
/// pipeline.add_work(work, ["greet"], false, false, Map::new()).unwrap();
///
/// let report = pipeline.run(RunOptions::new()).unwrap();
/// assert_eq!(report.status, Status::Success);
/// assert_eq!(report.executed, vec!["0"]);
/// ```
pub struct Pipeline {
    name: String,
    steps: StepSequence,
    run_steps: Option<Vec<Unit>>,
    run_step_idx: usize,
    paths: BTreeMap<String, PathBuf>,
    globals: GlobalState,
    checkpointer: Box<dyn Checkpointer>,
    timeline: ExecutionTimeline,
}

impl Pipeline {
    /// Creates an empty pipeline named after the current local time.
    pub fn new() -> Self {
        Self {
            name: Local::now().format("%Y-%m-%d_%H-%M-%S_pipeline").to_string(),
            steps: StepSequence::new(),
            run_steps: None,
            run_step_idx: 0,
            paths: BTreeMap::new(),
            globals: GlobalState::new(),
            checkpointer: Box::new(JsonCheckpointer),
            timeline: ExecutionTimeline::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Starts the step identity counter at `next_id`. Only valid before steps are added.
    pub fn with_next_id(mut self, next_id: usize) -> Self {
        if self.steps.is_empty() {
            self.steps = StepSequence::with_next_id(next_id);
        }
        self
    }

    pub fn with_globals(mut self, globals: GlobalState) -> Self {
        self.globals = globals;
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: impl Checkpointer + 'static) -> Self {
        self.checkpointer = Box::new(checkpointer);
        self
    }

    /// Sets the named paths after checking that each exists.
    ///
    /// Missing directories are created when `create_paths` is set; otherwise
    /// they are a configuration error.
    pub fn set_paths(
        &mut self,
        paths: BTreeMap<String, PathBuf>,
        create_paths: bool,
    ) -> Result<(), PipelineError> {
        check_paths(&paths, create_paths)?;
        self.paths = paths;
        Ok(())
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn paths(&self) -> &BTreeMap<String, PathBuf> {
        &self.paths
    }

    pub fn path(&self, name: &str) -> Option<&Path> {
        self.paths.get(name).map(PathBuf::as_path)
    }

    pub fn globals(&self) -> &GlobalState {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut GlobalState {
        &mut self.globals
    }

    pub fn steps(&self) -> &StepSequence {
        &self.steps
    }

    /// Working list of the current or most recent run.
    pub fn run_steps(&self) -> Option<&[Unit]> {
        self.run_steps.as_deref()
    }

    /// Index into the working list of the next unit to execute.
    pub fn run_step_idx(&self) -> usize {
        self.run_step_idx
    }

    /// Timeline of the current or most recent run.
    pub fn timeline(&self) -> &ExecutionTimeline {
        &self.timeline
    }

    /// Appends a step or group. See [`StepSequence::add_step`].
    pub fn add_step(&mut self, unit: impl Into<Unit>) -> Result<String, PipelineError> {
        self.steps.add_step(unit)
    }

    /// Wraps `work` in a new step and appends it.
    pub fn add_work<I, S>(
        &mut self,
        work: Work,
        tags: I,
        ignore_errors: bool,
        ignore_exceptions: bool,
        kwargs: Map<String, Value>,
    ) -> Result<String, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps
            .add_work(work, tags, ignore_errors, ignore_exceptions, kwargs)
    }

    /// Checkpoint destination for a run, if a `log` path is configured.
    pub fn checkpoint_path(&self, run_name: Option<&str>) -> Option<PathBuf> {
        self.path(LOG_PATH).map(|dir| checkpoint_file(dir, run_name))
    }

    /// Runs the pipeline.
    ///
    /// # Returns
    ///
    /// * `Ok(RunReport)` - Every unit of the working list was executed
    /// * `Err` - A unit aborted the run, a checkpoint could not be written
    ///   (when fatal), or the options were invalid. The cursor is left at
    ///   the aborting unit so `resume` retries it.
    pub fn run(&mut self, options: RunOptions) -> Result<RunReport, PipelineError> {
        let RunOptions {
            run_tags,
            ignore_tags,
            run_steps,
            resume,
            ignore_errors,
            ignore_exceptions,
            start_idx,
            run_name,
            fail_on_checkpoint_error,
        } = options;

        validate_tags("run_tags", &run_tags)?;
        validate_tags("ignore_tags", &ignore_tags)?;

        let candidates = match run_steps {
            Some(mut units) => {
                for unit in units.iter_mut().filter(|u| u.id().is_none()) {
                    let id = self.steps.get_next_id();
                    unit.assign_id(id);
                }
                units
            }
            None => match &self.run_steps {
                Some(previous) if resume => previous.clone(),
                _ => self.steps.units().to_vec(),
            },
        };

        let selected: Vec<Unit> = candidates
            .into_iter()
            .filter(|u| u.matches(&run_tags, &ignore_tags))
            .collect();
        let total = selected.len();

        // Rejected options leave the previous working list and cursor in place
        let cursor = match start_idx {
            Some(idx) if idx > total => {
                return Err(PipelineError::Configuration(format!(
                    "start_idx {} is past the end of the {} selected steps",
                    idx, total
                )));
            }
            Some(idx) => idx,
            None if !resume => 0,
            None => self.run_step_idx.min(total),
        };
        self.run_steps = Some(selected);
        self.run_step_idx = cursor;

        let destination = self.checkpoint_path(run_name.as_deref());
        if let Some(path) = &destination {
            info!("Pipeline state will be saved to {}", path.display());
            self.checkpoint(path, fail_on_checkpoint_error)?;
        }

        info!(
            "Running pipeline '{}': {} of {} steps selected, starting at {}",
            self.name,
            total,
            self.steps.len(),
            cursor
        );

        let policy = Policy {
            ignore_errors,
            ignore_exceptions,
        };
        self.timeline = ExecutionTimeline::new();
        let mut executed = Vec::new();

        while self.run_step_idx < total {
            let position = self.run_step_idx;
            let outcome = self.dispatch(position, policy);

            let unit_id = match self.run_steps.as_ref().and_then(|units| units.get(position)) {
                Some(unit) => {
                    self.steps.replace(unit);
                    unit.id().unwrap_or_default().to_string()
                }
                None => String::new(),
            };

            match outcome {
                Ok(status) => {
                    self.timeline
                        .record(&unit_id, position, EventType::Finished(status));
                    executed.push(unit_id);
                }
                Err(e) => {
                    self.timeline.record(&unit_id, position, EventType::Aborted);
                    error!("Pipeline aborted at step {} (run_step_idx {})", unit_id, position);
                    return Err(e);
                }
            }

            self.run_step_idx += 1;
            if let Some(path) = &destination {
                self.checkpoint(path, fail_on_checkpoint_error)?;
            }
        }

        info!("Pipeline '{}' completed", self.name);
        debug!("Run summary:\n{}", self.timeline.summary());

        Ok(RunReport {
            status: Status::Success,
            executed,
        })
    }

    /// Executes the unit at `position` of the working list.
    fn dispatch(&mut self, position: usize, policy: Policy) -> Result<Status, PipelineError> {
        let Self {
            name,
            paths,
            globals,
            run_steps,
            timeline,
            ..
        } = self;

        let unit = run_steps
            .as_mut()
            .and_then(|units| units.get_mut(position))
            .ok_or_else(|| {
                PipelineError::Internal(format!("no step at run_step_idx {}", position))
            })?;
        let unit_id = unit.id().unwrap_or_default().to_string();

        info!(
            "running {} {}: {:?}",
            unit.kind(),
            unit_id,
            unit.tags()
        );
        timeline.record(&unit_id, position, EventType::Started);

        let env = ExecEnv {
            name: name.as_str(),
            paths,
            globals,
            run_step_idx: position,
        };
        unit.execute(env, policy).map(|result| result.status)
    }

    /// Saves a checkpoint. Failures are logged and only returned when `fatal`.
    fn checkpoint(&self, path: &Path, fatal: bool) -> Result<bool, PipelineError> {
        match self.checkpointer.save(&self.to_state(), path) {
            Ok(()) => Ok(true),
            Err(source) => {
                warn!("Pipeline not saved to {}: {}", path.display(), source);
                if fatal {
                    return Err(PipelineError::Persistence {
                        path: path.to_path_buf(),
                        source,
                    });
                }
                Ok(false)
            }
        }
    }

    /// Saves the pipeline to `path` with its checkpointer; returns whether it was written.
    pub fn save_pipeline(&self, path: &Path) -> bool {
        self.checkpoint(path, false).unwrap_or(false)
    }

    /// Snapshot of the complete pipeline state.
    pub fn to_state(&self) -> PipelineState {
        PipelineState {
            version: STATE_VERSION,
            name: self.name.clone(),
            paths: self.paths.clone(),
            next_id: self.steps.next_id(),
            globals: self.globals.clone(),
            steps: snapshot_units(self.steps.units()),
            run_steps: self.run_steps.as_deref().map(snapshot_units),
            run_step_idx: self.run_step_idx,
            saved_at: Utc::now(),
        }
    }

    /// Rebuilds a pipeline from a snapshot, resolving works through `registry`.
    pub fn restore(state: PipelineState, registry: &WorkRegistry) -> Result<Self, PipelineError> {
        state.check_version()?;

        let steps = restore_sequence(state.steps, state.next_id, registry)?;
        let run_steps = match state.run_steps {
            Some(units) => Some(restore_units(units, registry)?),
            None => None,
        };

        let len = run_steps.as_ref().map_or(0, Vec::len);
        if state.run_step_idx > len {
            return Err(PipelineError::Configuration(format!(
                "saved run_step_idx {} is past the end of the {} saved run steps",
                state.run_step_idx, len
            )));
        }

        Ok(Self {
            name: state.name,
            steps,
            run_steps,
            run_step_idx: state.run_step_idx,
            paths: state.paths,
            globals: state.globals,
            checkpointer: Box::new(JsonCheckpointer),
            timeline: ExecutionTimeline::new(),
        })
    }

    /// Loads a pipeline saved by [`JsonCheckpointer`].
    pub fn load(path: &Path, registry: &WorkRegistry) -> Result<Self, PipelineError> {
        let state = JsonCheckpointer.load(path)?;
        Self::restore(state, registry)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("run_steps", &self.run_steps)
            .field("run_step_idx", &self.run_step_idx)
            .field("paths", &self.paths)
            .field("globals", &self.globals)
            .finish()
    }
}

fn validate_tags(field: &str, tags: &BTreeSet<String>) -> Result<(), PipelineError> {
    if tags.iter().any(|t| t.trim().is_empty()) {
        return Err(PipelineError::Configuration(format!(
            "{} contains an empty tag",
            field
        )));
    }
    Ok(())
}

impl Pipeline {
    /// Clones the top-level units with the given identities, for [`RunOptions::run_steps`].
    pub fn select(&self, ids: &[&str]) -> Vec<Unit> {
        ids.iter()
            .filter_map(|id| self.steps.get(id).cloned())
            .collect()
    }

    /// Looks up a top-level step by identity.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.get(id).and_then(Unit::as_step)
    }
}

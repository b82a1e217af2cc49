//! Pipeline Data Model
//!
//! Core data structures describing what a pipeline runs:
//!
//! - [`Step`]: a single work with arguments, tags and error policy
//! - [`ConcurrentGroup`]: steps fanned out over a pool of worker threads
//! - [`Unit`]: either of the above, the thing the run loop schedules
//! - [`StepSequence`]: the ordered units of a pipeline plus identity assignment
//!
//! # Identities
//!
//! Units added without an identity get the next value of the sequence
//! counter (`"0"`, `"1"`, ...). Children of a group are namespaced under the
//! group identity (`"<group>-0"`, `"<group>-1"`, ...).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::work::{Initializer, Work};
use crate::error::PipelineError;

/// Status reported by a step or derived for a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    Success,
    Error,
    Unknown,
    /// Group where some, but not all, children failed
    SomeFailed,
    /// Any other status text returned by a work
    Other(String),
}

impl Status {
    /// Parses a status case-insensitively.
    pub fn parse(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "success" => Self::Success,
            "error" => Self::Error,
            "unknown" => Self::Unknown,
            "some failed" => Self::SomeFailed,
            _ => Self::Other(text.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Unknown => "unknown",
            Self::SomeFailed => "some failed",
            Self::Other(text) => text,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl From<String> for Status {
    fn from(text: String) -> Self {
        Self::parse(&text)
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result recorded on a unit after it executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: Status,

    /// Everything else the work returned next to `status`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StepResult {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            extra: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Normalizes a value returned by a work.
    ///
    /// A value that is not an object with a string `status` is wrapped as
    /// `{status: "unknown", result: <value>}`; the flag reports whether the
    /// value was well formed.
    pub fn from_value(value: Value) -> (Self, bool) {
        match value {
            Value::Object(mut map) => match map.remove("status") {
                Some(Value::String(status)) => (
                    Self {
                        status: Status::parse(&status),
                        extra: map,
                    },
                    true,
                ),
                Some(other) => {
                    map.insert("status".to_string(), other);
                    (Self::malformed(Value::Object(map)), false)
                }
                None => (Self::malformed(Value::Object(map)), false),
            },
            other => (Self::malformed(other), false),
        }
    }

    fn malformed(value: Value) -> Self {
        Self::new(Status::Unknown).with("result", value)
    }
}

/// A single unit of work in a pipeline.
#[derive(Debug, Clone)]
pub struct Step {
    pub(crate) id: Option<String>,
    pub tags: BTreeSet<String>,
    pub(crate) work: Work,
    /// Keyword arguments passed to the work
    pub kwargs: Map<String, Value>,
    /// Continue the run when the work returns an `error` status
    pub ignore_errors: bool,
    /// Convert faults into an `error` result instead of aborting
    pub ignore_exceptions: bool,
    pub(crate) result: Option<StepResult>,
}

impl Step {
    /// Creates a step without identity, tags or arguments.
    ///
    /// # Example
    ///
    /// ```
    /// use serde_json::json;
    /// use stepwise::workflow::{Step, Work};
    ///
    /// let work = Work::new("calibrate", |_| Ok(json!({"status": "success"})));
    /// let step = Step::new(work)
    ///     .with_tag("calibration")
    ///     .with_arg("exposure", 30)
    ///     .with_ignore_errors(true);
    ///
    /// assert!(step.id().is_none());
    /// assert!(step.tags.contains("calibration"));
    /// assert!(step.result().is_none());
    /// ```
    pub fn new(work: Work) -> Self {
        Self {
            id: None,
            tags: BTreeSet::new(),
            work,
            kwargs: Map::new(),
            ignore_errors: false,
            ignore_exceptions: false,
            result: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into().trim().to_string());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_ignore_errors(mut self, ignore: bool) -> Self {
        self.ignore_errors = ignore;
        self
    }

    pub fn with_ignore_exceptions(mut self, ignore: bool) -> Self {
        self.ignore_exceptions = ignore;
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn work(&self) -> &Work {
        &self.work
    }

    pub fn result(&self) -> Option<&StepResult> {
        self.result.as_ref()
    }

    /// Assigns an identity unless one is already set.
    pub(crate) fn assign_id(&mut self, id: String) {
        if self.id.is_none() {
            self.id = Some(id);
        }
    }
}

/// Steps executed concurrently on a bounded pool of worker threads.
#[derive(Debug, Clone)]
pub struct ConcurrentGroup {
    pub(crate) id: Option<String>,
    pub tags: BTreeSet<String>,
    pub(crate) worker_count: usize,
    pub(crate) steps: Vec<Step>,
    pub(crate) next_id: usize,
    pub(crate) initializer: Option<Initializer>,
    pub(crate) result: Option<StepResult>,
}

impl Default for ConcurrentGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcurrentGroup {
    /// Creates an empty group sized to the host's available parallelism.
    pub fn new() -> Self {
        Self {
            id: None,
            tags: BTreeSet::new(),
            worker_count: num_cpus::get().max(1),
            steps: Vec::new(),
            next_id: 0,
            initializer: None,
            result: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.assign_id(id.into().trim().to_string());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.worker_count = workers.max(1);
        self
    }

    pub fn with_initializer(mut self, initializer: Initializer) -> Self {
        self.initializer = Some(initializer);
        self
    }

    /// Builder form of [`ConcurrentGroup::add_step`].
    pub fn with_step(mut self, step: Step) -> Result<Self, PipelineError> {
        self.add_step(step)?;
        Ok(self)
    }

    /// Adds a child step.
    ///
    /// Rejects works that need the pipeline handle and explicit identities
    /// already used in this group. Returns the child identity if the group
    /// already has one of its own.
    pub fn add_step(&mut self, mut step: Step) -> Result<Option<String>, PipelineError> {
        if step.work.needs().pipeline {
            return Err(PipelineError::Configuration(format!(
                "work '{}' needs the pipeline handle and cannot run in a concurrent group",
                step.work.name()
            )));
        }

        if let Some(id) = step.id() {
            if id.trim().is_empty() {
                return Err(empty_id_error());
            }
            if self.steps.iter().any(|s| s.id() == Some(id)) {
                return Err(PipelineError::DuplicateStepId(id.to_string()));
            }
        } else if self.id.is_some() {
            let id = self.next_child_id();
            step.assign_id(id);
        }

        let id = step.id.clone();
        self.steps.push(step);
        Ok(id)
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn initializer(&self) -> Option<&Initializer> {
        self.initializer.as_ref()
    }

    /// Aggregate result of the last execution.
    pub fn result(&self) -> Option<&StepResult> {
        self.result.as_ref()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Assigns the group identity unless one is set, then names any
    /// children still waiting for theirs.
    pub(crate) fn assign_id(&mut self, id: String) {
        if self.id.is_none() {
            self.id = Some(id);
        }
        for idx in 0..self.steps.len() {
            if self.steps[idx].id.is_none() {
                let child_id = self.next_child_id();
                self.steps[idx].assign_id(child_id);
            }
        }
    }

    fn next_child_id(&mut self) -> String {
        let prefix = self.id.clone().unwrap_or_default();
        loop {
            let candidate = format!("{}-{}", prefix, self.next_id);
            self.next_id += 1;
            if !self.steps.iter().any(|s| s.id() == Some(candidate.as_str())) {
                return candidate;
            }
        }
    }

    /// Derives and stores the aggregate result from the children.
    pub(crate) fn aggregate(&mut self) -> StepResult {
        let statuses: Vec<Option<&Status>> = self
            .steps
            .iter()
            .map(|s| s.result().map(|r| &r.status))
            .collect();

        let status = if statuses.iter().all(|s| s.map_or(false, Status::is_success)) {
            Status::Success
        } else if statuses.iter().all(|s| s.map_or(false, Status::is_error)) {
            Status::Error
        } else {
            Status::SomeFailed
        };

        let result = StepResult::new(status);
        self.result = Some(result.clone());
        result
    }
}

fn empty_id_error() -> PipelineError {
    PipelineError::Configuration("step identity must not be empty".to_string())
}

/// A schedulable unit: a single step or a concurrent group.
#[derive(Debug, Clone)]
pub enum Unit {
    Step(Step),
    Group(ConcurrentGroup),
}

impl Unit {
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Step(step) => step.id(),
            Self::Group(group) => group.id(),
        }
    }

    /// The unit's identity followed by those of its children.
    pub fn ids(&self) -> Vec<&str> {
        match self {
            Self::Step(step) => step.id().into_iter().collect(),
            Self::Group(group) => group
                .id()
                .into_iter()
                .chain(group.steps.iter().filter_map(Step::id))
                .collect(),
        }
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        match self {
            Self::Step(step) => &step.tags,
            Self::Group(group) => &group.tags,
        }
    }

    pub fn result(&self) -> Option<&StepResult> {
        match self {
            Self::Step(step) => step.result(),
            Self::Group(group) => group.result(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Step(_) => "step",
            Self::Group(_) => "group",
        }
    }

    pub fn as_step(&self) -> Option<&Step> {
        match self {
            Self::Step(step) => Some(step),
            Self::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&ConcurrentGroup> {
        match self {
            Self::Group(group) => Some(group),
            Self::Step(_) => None,
        }
    }

    /// Tag filter: `ignore_tags` always wins; an empty `run_tags` keeps everything else.
    pub fn matches(&self, run_tags: &BTreeSet<String>, ignore_tags: &BTreeSet<String>) -> bool {
        let tags = self.tags();
        (run_tags.is_empty() || tags.iter().any(|t| run_tags.contains(t)))
            && !tags.iter().any(|t| ignore_tags.contains(t))
    }

    pub(crate) fn assign_id(&mut self, id: String) {
        match self {
            Self::Step(step) => step.assign_id(id),
            Self::Group(group) => group.assign_id(id),
        }
    }
}

impl From<Step> for Unit {
    fn from(step: Step) -> Self {
        Self::Step(step)
    }
}

impl From<ConcurrentGroup> for Unit {
    fn from(group: ConcurrentGroup) -> Self {
        Self::Group(group)
    }
}

/// Ordered units of a pipeline; insertion order is execution order.
#[derive(Debug, Clone, Default)]
pub struct StepSequence {
    units: Vec<Unit>,
    next_id: usize,
}

impl StepSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the identity counter at `next_id`.
    pub fn with_next_id(next_id: usize) -> Self {
        Self {
            units: Vec::new(),
            next_id,
        }
    }

    pub(crate) fn from_parts(units: Vec<Unit>, next_id: usize) -> Self {
        Self { units, next_id }
    }

    /// Appends a step or group, assigning an identity if it has none.
    ///
    /// Returns the unit's identity. Identities of the unit and of a group's
    /// children must not already be used anywhere in the sequence, child
    /// identities included.
    pub fn add_step(&mut self, unit: impl Into<Unit>) -> Result<String, PipelineError> {
        let mut unit = unit.into();

        match unit.id() {
            Some(id) if id.trim().is_empty() => return Err(empty_id_error()),
            Some(_) => {}
            None => {
                let id = self.get_next_id();
                unit.assign_id(id);
            }
        }
        // Groups built with an explicit id may still hold unnamed children
        if let Unit::Group(group) = &mut unit {
            if let Some(id) = group.id.clone() {
                group.assign_id(id);
            }
        }

        if let Some(taken) = unit.ids().into_iter().find(|id| self.contains_id(id)) {
            return Err(PipelineError::DuplicateStepId(taken.to_string()));
        }

        let id = unit.id().unwrap_or_default().to_string();
        self.units.push(unit);
        Ok(id)
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
        let step = Step::new(work)
            .with_tags(tags)
            .with_ignore_errors(ignore_errors)
            .with_ignore_exceptions(ignore_exceptions)
            .with_kwargs(kwargs);
        self.add_step(step)
    }

    /// Returns the next free counter identity and advances the counter.
    pub fn get_next_id(&mut self) -> String {
        loop {
            let candidate = self.next_id.to_string();
            self.next_id += 1;
            if !self.contains_id(&candidate) {
                return candidate;
            }
        }
    }

    pub fn next_id(&self) -> usize {
        self.next_id
    }

    /// Whether `id` names a unit or a group child in the sequence.
    pub fn contains_id(&self, id: &str) -> bool {
        self.units.iter().any(|u| u.ids().contains(&id))
    }

    pub fn get(&self, id: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.id() == Some(id))
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Overwrites the unit sharing `unit`'s identity. Returns false if none does.
    pub(crate) fn replace(&mut self, unit: &Unit) -> bool {
        let Some(id) = unit.id() else {
            return false;
        };
        match self.units.iter_mut().find(|u| u.id() == Some(id)) {
            Some(slot) => {
                *slot = unit.clone();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn work(name: &str) -> Work {
        Work::new(name, |_| Ok(json!({"status": "success"})))
    }

    fn tags(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!(Status::parse("ERROR"), Status::Error);
        assert_eq!(Status::parse("Success"), Status::Success);
        assert_eq!(Status::parse("some failed"), Status::SomeFailed);
        assert_eq!(Status::parse("skipped"), Status::Other("skipped".to_string()));
    }

    #[test]
    fn test_status_serializes_as_text() {
        let json = serde_json::to_string(&Status::SomeFailed).unwrap();
        assert_eq!(json, "\"some failed\"");
        let status: Status = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(status, Status::Error);
    }

    #[test]
    fn test_result_from_well_formed_value() {
        let (result, ok) = StepResult::from_value(json!({"status": "success", "rows": 3}));
        assert!(ok);
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.get("rows"), Some(&json!(3)));
    }

    #[test]
    fn test_result_from_malformed_values() {
        let (result, ok) = StepResult::from_value(json!(42));
        assert!(!ok);
        assert_eq!(result.status, Status::Unknown);
        assert_eq!(result.get("result"), Some(&json!(42)));

        let (result, ok) = StepResult::from_value(json!({"rows": 3}));
        assert!(!ok);
        assert_eq!(result.get("result"), Some(&json!({"rows": 3})));

        let (result, ok) = StepResult::from_value(json!({"status": 1}));
        assert!(!ok);
        assert_eq!(result.get("result"), Some(&json!({"status": 1})));
    }

    #[test]
    fn test_result_json_is_flat() {
        let result = StepResult::new(Status::Error).with("error", "boom");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value, json!({"status": "error", "error": "boom"}));
    }

    #[test]
    fn test_sequence_assigns_monotonic_ids() {
        let mut seq = StepSequence::new();
        assert_eq!(seq.add_step(Step::new(work("a"))).unwrap(), "0");
        assert_eq!(seq.add_step(Step::new(work("b"))).unwrap(), "1");
        assert_eq!(seq.next_id(), 2);
    }

    #[test]
    fn test_sequence_keeps_explicit_ids() {
        let mut seq = StepSequence::new();
        seq.add_step(Step::new(work("a")).with_id("load")).unwrap();
        assert!(seq.get("load").is_some());
        assert_eq!(seq.next_id(), 0);
    }

    #[test]
    fn test_sequence_rejects_duplicate_ids() {
        let mut seq = StepSequence::new();
        seq.add_step(Step::new(work("a")).with_id("x")).unwrap();
        let err = seq.add_step(Step::new(work("b")).with_id("x")).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateStepId(id) if id == "x"));
        assert_eq!(seq.len(), 1);
    }

    #[test]
    fn test_top_level_id_cannot_reuse_group_child_id() {
        let mut seq = StepSequence::new();
        let group = ConcurrentGroup::new()
            .with_id("g")
            .with_step(Step::new(work("a")))
            .unwrap();
        seq.add_step(group).unwrap();

        let err = seq.add_step(Step::new(work("b")).with_id("g-0")).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateStepId(id) if id == "g-0"));
        assert!(seq.contains_id("g-0"));
        assert_eq!(seq.len(), 1);
    }

    #[test]
    fn test_group_child_id_cannot_reuse_top_level_id() {
        let mut seq = StepSequence::new();
        seq.add_step(Step::new(work("a")).with_id("fan-0")).unwrap();

        let group = ConcurrentGroup::new()
            .with_step(Step::new(work("b")))
            .unwrap()
            .with_id("fan");
        let err = seq.add_step(group).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateStepId(id) if id == "fan-0"));
        assert_eq!(seq.len(), 1);
    }

    #[test]
    fn test_empty_explicit_ids_rejected() {
        let mut seq = StepSequence::new();
        let err = seq.add_step(Step::new(work("a")).with_id("")).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));

        let err = seq.add_step(ConcurrentGroup::new().with_id("  ")).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));

        let mut group = ConcurrentGroup::new();
        let err = group.add_step(Step::new(work("b")).with_id(" ")).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(seq.is_empty());
        assert!(group.is_empty());
    }

    #[test]
    fn test_counter_skips_explicit_ids() {
        let mut seq = StepSequence::new();
        seq.add_step(Step::new(work("a")).with_id("0")).unwrap();
        assert_eq!(seq.add_step(Step::new(work("b"))).unwrap(), "1");
    }

    #[test]
    fn test_seeded_counter() {
        let mut seq = StepSequence::with_next_id(10);
        assert_eq!(seq.add_step(Step::new(work("a"))).unwrap(), "10");
    }

    #[test]
    fn test_add_work_builds_step() {
        let mut seq = StepSequence::new();
        let mut kwargs = Map::new();
        kwargs.insert("n".to_string(), json!(2));

        let id = seq.add_work(work("a"), ["reduce"], true, false, kwargs).unwrap();
        let step = seq.get(&id).and_then(Unit::as_step).unwrap();

        assert!(step.tags.contains("reduce"));
        assert!(step.ignore_errors);
        assert!(!step.ignore_exceptions);
        assert_eq!(step.kwargs.get("n"), Some(&json!(2)));
    }

    #[test]
    fn test_group_children_namespaced_after_group_id() {
        let group = ConcurrentGroup::new()
            .with_step(Step::new(work("a")))
            .unwrap()
            .with_step(Step::new(work("b")))
            .unwrap();
        assert!(group.steps().iter().all(|s| s.id().is_none()));

        let mut seq = StepSequence::new();
        seq.add_step(Step::new(work("first"))).unwrap();
        let id = seq.add_step(group).unwrap();
        assert_eq!(id, "1");

        let group = seq.get("1").and_then(Unit::as_group).unwrap();
        let ids: Vec<_> = group.steps().iter().map(|s| s.id().unwrap()).collect();
        assert_eq!(ids, vec!["1-0", "1-1"]);
    }

    #[test]
    fn test_group_with_id_names_children_immediately() {
        let mut group = ConcurrentGroup::new().with_id("fan");
        let id = group.add_step(Step::new(work("a"))).unwrap();
        assert_eq!(id.as_deref(), Some("fan-0"));
    }

    #[test]
    fn test_group_rejects_pipeline_needing_work() {
        let mut group = ConcurrentGroup::new();
        let err = group
            .add_step(Step::new(work("a").needs_pipeline()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(group.is_empty());
    }

    #[test]
    fn test_group_worker_count_at_least_one() {
        let group = ConcurrentGroup::new().with_workers(0);
        assert_eq!(group.worker_count(), 1);
        assert!(ConcurrentGroup::new().worker_count() >= 1);
    }

    #[test]
    fn test_group_aggregate() {
        let mut group = ConcurrentGroup::new().with_id("g");
        group.add_step(Step::new(work("a"))).unwrap();
        group.add_step(Step::new(work("b"))).unwrap();

        group.steps[0].result = Some(StepResult::new(Status::Success));
        group.steps[1].result = Some(StepResult::new(Status::Success));
        assert_eq!(group.aggregate().status, Status::Success);

        group.steps[1].result = Some(StepResult::new(Status::Error));
        assert_eq!(group.aggregate().status, Status::SomeFailed);

        group.steps[0].result = Some(StepResult::new(Status::Error));
        assert_eq!(group.aggregate().status, Status::Error);
        assert_eq!(group.result().unwrap().status, Status::Error);
    }

    #[test]
    fn test_unit_filtering() {
        let unit: Unit = Step::new(work("a")).with_tags(["raw", "slow"]).into();

        assert!(unit.matches(&tags(&[]), &tags(&[])));
        assert!(unit.matches(&tags(&["raw"]), &tags(&[])));
        assert!(!unit.matches(&tags(&["calib"]), &tags(&[])));
        assert!(!unit.matches(&tags(&[]), &tags(&["slow"])));
        assert!(!unit.matches(&tags(&["raw"]), &tags(&["slow"])));
    }

    #[test]
    fn test_replace_by_id() {
        let mut seq = StepSequence::new();
        seq.add_step(Step::new(work("a"))).unwrap();

        let mut updated = seq.units()[0].clone();
        if let Unit::Step(step) = &mut updated {
            step.result = Some(StepResult::new(Status::Success));
        }
        assert!(seq.replace(&updated));
        assert!(seq.units()[0].result().is_some());

        let stranger: Unit = Step::new(work("b")).with_id("zzz").into();
        assert!(!seq.replace(&stranger));
    }
}

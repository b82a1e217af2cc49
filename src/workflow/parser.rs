//! Pipeline Definition Parser
//!
//! Loads pipeline definitions from YAML and builds a [`Pipeline`] from them,
//! resolving work names through a [`WorkRegistry`].
//!
//! ```yaml
//! name: nightly
//! create_paths: true
//! paths: { log: ./logs, temp: ./tmp }
//! steps:
//!   - work: shell
//!     tags: [prep]
//!     args: { command: "echo hi" }
//!   - group: fanout
//!     workers: 4
//!     steps:
//!       - { work: shell, args: { command: "true" } }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::model::{ConcurrentGroup, Step, Unit};
use super::validator::validate_definition;
use super::work::{GlobalState, WorkRegistry};
use crate::error::PipelineError;
use crate::execution::Pipeline;

/// A pipeline as declared in YAML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDefinition {
    #[serde(default)]
    pub name: Option<String>,

    /// Create missing directories listed in `paths`
    #[serde(default)]
    pub create_paths: bool,

    #[serde(default)]
    pub paths: BTreeMap<String, PathBuf>,

    #[serde(default)]
    pub globals: GlobalState,

    #[serde(default)]
    pub steps: Vec<UnitDefinition>,
}

/// One entry of `steps`: a group (has a `group` key) or a single step.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UnitDefinition {
    Group(GroupDefinition),
    Step(StepDefinition),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDefinition {
    pub work: String,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub ignore_errors: bool,

    #[serde(default)]
    pub ignore_exceptions: bool,

    /// Keyword arguments passed to the work
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupDefinition {
    /// Group identity; empty for an assigned one
    pub group: String,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Worker threads (defaults to the CPU count)
    #[serde(default)]
    pub workers: Option<usize>,

    /// Name of a registered initializer run once per worker
    #[serde(default)]
    pub initializer: Option<String>,

    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl StepDefinition {
    fn build(&self, registry: &WorkRegistry) -> Result<Step, PipelineError> {
        let work = registry
            .get(&self.work)
            .ok_or_else(|| PipelineError::Definition(format!("unknown work '{}'", self.work)))?;

        let mut step = Step::new(work.clone())
            .with_tags(self.tags.iter().cloned())
            .with_kwargs(self.args.clone())
            .with_ignore_errors(self.ignore_errors)
            .with_ignore_exceptions(self.ignore_exceptions);
        if let Some(id) = &self.id {
            step = step.with_id(id.clone());
        }
        Ok(step)
    }
}

impl GroupDefinition {
    fn build(&self, registry: &WorkRegistry) -> Result<ConcurrentGroup, PipelineError> {
        let mut group = ConcurrentGroup::new().with_tags(self.tags.iter().cloned());
        if !self.group.trim().is_empty() {
            group = group.with_id(self.group.clone());
        }
        if let Some(workers) = self.workers {
            group = group.with_workers(workers);
        }
        if let Some(name) = &self.initializer {
            let initializer = registry.initializer(name).ok_or_else(|| {
                PipelineError::Definition(format!("unknown initializer '{}'", name))
            })?;
            group = group.with_initializer(initializer.clone());
        }

        for step in &self.steps {
            group.add_step(step.build(registry)?)?;
        }
        Ok(group)
    }
}

impl UnitDefinition {
    fn build(&self, registry: &WorkRegistry) -> Result<Unit, PipelineError> {
        match self {
            Self::Step(step) => step.build(registry).map(Unit::from),
            Self::Group(group) => group.build(registry).map(Unit::from),
        }
    }
}

/// Parses and validates a YAML pipeline definition.
pub fn parse_definition(yaml: &str) -> Result<PipelineDefinition, PipelineError> {
    serde_yaml::from_str(yaml).map_err(|e| {
        PipelineError::Definition(format!(
            "Failed to parse pipeline YAML: {}. Check the file format.",
            e
        ))
    })
}

/// Builds a pipeline from YAML text.
pub fn parse_pipeline(yaml: &str, registry: &WorkRegistry) -> Result<Pipeline, PipelineError> {
    let definition = parse_definition(yaml)?;
    build_pipeline(&definition, registry)
}

/// Validates `definition` and builds the pipeline it declares.
pub fn build_pipeline(
    definition: &PipelineDefinition,
    registry: &WorkRegistry,
) -> Result<Pipeline, PipelineError> {
    validate_definition(definition, registry)?;

    let mut pipeline = Pipeline::new().with_globals(definition.globals.clone());
    if let Some(name) = &definition.name {
        pipeline.set_name(name.clone());
    }
    pipeline.set_paths(definition.paths.clone(), definition.create_paths)?;

    for unit in &definition.steps {
        let id = pipeline.add_step(unit.build(registry)?)?;
        debug!("Added {} {}", unit_kind(unit), id);
    }

    info!(
        "Built pipeline '{}' with {} steps",
        pipeline.name(),
        pipeline.steps().len()
    );
    Ok(pipeline)
}

/// Loads a pipeline from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use stepwise::execution::RunOptions;
/// use stepwise::workflow::{load_pipeline, WorkRegistry};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let registry = WorkRegistry::with_builtins();
///     let mut pipeline = load_pipeline("pipeline.yaml", &registry)?;
///     pipeline.run(RunOptions::new())?;
///     Ok(())
/// }
/// ```
pub fn load_pipeline(
    path: impl AsRef<Path>,
    registry: &WorkRegistry,
) -> Result<Pipeline, PipelineError> {
    let path = path.as_ref();
    info!("Loading pipeline from: {}", path.display());

    let yaml = fs::read_to_string(path).map_err(|e| {
        PipelineError::Definition(format!(
            "Failed to read pipeline file '{}': {}. Check that the file exists and is readable.",
            path.display(),
            e
        ))
    })?;
    debug!("YAML content loaded ({} bytes)", yaml.len());

    parse_pipeline(&yaml, registry)
}

fn unit_kind(unit: &UnitDefinition) -> &'static str {
    match unit {
        UnitDefinition::Step(_) => "step",
        UnitDefinition::Group(_) => "group",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::work::{Initializer, Work};
    use serde_json::json;
    use tempfile::tempdir;

    fn registry() -> WorkRegistry {
        let mut registry = WorkRegistry::with_builtins();
        registry.register(Work::new("noop", |_| Ok(json!({"status": "success"}))));
        registry.register(
            Work::new("inspect", |_| Ok(json!({"status": "success"}))).needs_pipeline(),
        );
        registry.register_initializer(Initializer::new("warmup", || {}));
        registry
    }

    #[test]
    fn test_parse_steps_and_groups() {
        let yaml = r#"
name: nightly
globals: { threshold: 3 }
steps:
  - work: noop
    tags: [prep]
    args: { size: 2 }
  - group: fanout
    workers: 2
    initializer: warmup
    steps:
      - { work: noop }
      - { work: noop, ignore_errors: true }
  - work: shell
    id: final
    args: { command: "true" }
"#;
        let pipeline = parse_pipeline(yaml, &registry()).unwrap();

        assert_eq!(pipeline.name(), "nightly");
        assert_eq!(pipeline.globals().get("threshold"), Some(&json!(3)));

        let ids: Vec<_> = pipeline.steps().iter().filter_map(Unit::id).collect();
        assert_eq!(ids, vec!["0", "fanout", "final"]);

        let first = pipeline.step("0").unwrap();
        assert!(first.tags.contains("prep"));
        assert_eq!(first.kwargs.get("size"), Some(&json!(2)));

        let group = pipeline.steps().get("fanout").and_then(Unit::as_group).unwrap();
        assert_eq!(group.worker_count(), 2);
        assert_eq!(group.initializer().map(Initializer::name), Some("warmup"));
        assert_eq!(group.steps()[1].id(), Some("fanout-1"));
        assert!(group.steps()[1].ignore_errors);
    }

    #[test]
    fn test_empty_group_id_is_assigned() {
        let yaml = r#"
steps:
  - group: ""
    steps:
      - { work: noop }
"#;
        let pipeline = parse_pipeline(yaml, &registry()).unwrap();
        let group = pipeline.steps().get("0").and_then(Unit::as_group).unwrap();
        assert_eq!(group.steps()[0].id(), Some("0-0"));
    }

    #[test]
    fn test_unknown_work_rejected() {
        let yaml = "steps:\n  - work: missing\n";
        let err = parse_pipeline(yaml, &registry()).unwrap_err();
        assert!(matches!(err, PipelineError::Definition(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = "steps:\n  - work: noop\n    colour: red\n";
        assert!(parse_pipeline(yaml, &registry()).is_err());
    }

    #[test]
    fn test_group_child_needing_pipeline_rejected() {
        let yaml = r#"
steps:
  - group: g
    steps:
      - { work: inspect }
"#;
        let err = parse_pipeline(yaml, &registry()).unwrap_err();
        assert!(err.to_string().contains("inspect"));
    }

    #[test]
    fn test_invalid_yaml() {
        let err = parse_pipeline("steps: [[[", &registry()).unwrap_err();
        assert!(matches!(err, PipelineError::Definition(_)));
    }

    #[test]
    fn test_load_pipeline_file_not_found() {
        let result = load_pipeline("/nonexistent/path/pipeline.yaml", &registry());
        assert!(result.is_err());
    }

    #[test]
    fn test_load_pipeline_creates_paths() {
        let temp_dir = tempdir().unwrap();
        let log_dir = temp_dir.path().join("logs");
        let path = temp_dir.path().join("pipeline.yaml");

        let yaml = format!(
            "name: files\ncreate_paths: true\npaths:\n  log: {}\nsteps:\n  - work: noop\n",
            log_dir.display()
        );
        fs::write(&path, yaml).unwrap();

        let pipeline = load_pipeline(&path, &registry()).unwrap();
        assert!(log_dir.is_dir());
        assert_eq!(
            pipeline.checkpoint_path(None),
            Some(log_dir.join("pipeline.json"))
        );
    }

    #[test]
    fn test_missing_path_without_create_rejected() {
        let temp_dir = tempdir().unwrap();
        let yaml = format!(
            "paths:\n  temp: {}\n",
            temp_dir.path().join("absent").display()
        );
        let err = parse_pipeline(&yaml, &registry()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}

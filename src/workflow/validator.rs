//! Pipeline Definition Validation
//!
//! Checks a parsed definition before anything is built:
//! - every step names a registered work
//! - explicit identities are unique
//! - group children do not need the pipeline handle
//! - tags are non-empty

use std::collections::HashSet;

use log::{debug, info};

use super::parser::{PipelineDefinition, StepDefinition, UnitDefinition};
use super::work::WorkRegistry;
use crate::error::PipelineError;

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyWorkName { position: usize },
    UnknownWork { position: usize, work: String },
    UnknownInitializer { group: String, initializer: String },
    DuplicateStepId(String),
    GroupNeedsPipeline { group: String, work: String },
    ZeroWorkers(String),
    EmptyTag { position: usize },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyWorkName { position } => {
                write!(f, "Step at position {} has no work specified", position)
            }
            Self::UnknownWork { position, work } => {
                write!(f, "Step at position {} uses unknown work '{}'", position, work)
            }
            Self::UnknownInitializer { group, initializer } => {
                write!(f, "Group '{}' uses unknown initializer '{}'", group, initializer)
            }
            Self::DuplicateStepId(id) => write!(f, "Duplicate step ID: '{}'", id),
            Self::GroupNeedsPipeline { group, work } => write!(
                f,
                "Group '{}': work '{}' needs the pipeline, which concurrent steps cannot receive",
                group, work
            ),
            Self::ZeroWorkers(group) => write!(f, "Group '{}' has zero workers", group),
            Self::EmptyTag { position } => {
                write!(f, "Step at position {} has an empty tag", position)
            }
        }
    }
}

/// Validates a single step's fields.
fn validate_step(
    step: &StepDefinition,
    position: usize,
    registry: &WorkRegistry,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if step.work.trim().is_empty() {
        errors.push(ValidationError::EmptyWorkName { position });
    } else if !registry.contains(&step.work) {
        errors.push(ValidationError::UnknownWork {
            position,
            work: step.work.clone(),
        });
    }

    if step.tags.iter().any(|t| t.trim().is_empty()) {
        errors.push(ValidationError::EmptyTag { position });
    }

    errors
}

fn check_id<'a>(id: &'a str, seen: &mut HashSet<&'a str>, errors: &mut Vec<ValidationError>) {
    if !id.trim().is_empty() && !seen.insert(id) {
        errors.push(ValidationError::DuplicateStepId(id.to_string()));
    }
}

/// Collects every problem in `definition`.
pub fn find_errors(definition: &PipelineDefinition, registry: &WorkRegistry) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen_ids: HashSet<&str> = HashSet::new();

    for (position, unit) in definition.steps.iter().enumerate() {
        match unit {
            UnitDefinition::Step(step) => {
                if let Some(id) = &step.id {
                    check_id(id, &mut seen_ids, &mut errors);
                }
                errors.extend(validate_step(step, position, registry));
            }
            UnitDefinition::Group(group) => {
                check_id(&group.group, &mut seen_ids, &mut errors);
                let label = if group.group.is_empty() {
                    format!("#{}", position)
                } else {
                    group.group.clone()
                };

                if group.workers == Some(0) {
                    errors.push(ValidationError::ZeroWorkers(label.clone()));
                }
                if group.tags.iter().any(|t| t.trim().is_empty()) {
                    errors.push(ValidationError::EmptyTag { position });
                }
                if let Some(name) = &group.initializer {
                    if registry.initializer(name).is_none() {
                        errors.push(ValidationError::UnknownInitializer {
                            group: label.clone(),
                            initializer: name.clone(),
                        });
                    }
                }

                for child in &group.steps {
                    if let Some(id) = &child.id {
                        check_id(id, &mut seen_ids, &mut errors);
                    }
                    errors.extend(validate_step(child, position, registry));

                    if let Some(work) = registry.get(&child.work) {
                        if work.needs().pipeline {
                            errors.push(ValidationError::GroupNeedsPipeline {
                                group: label.clone(),
                                work: child.work.clone(),
                            });
                        }
                    }
                }
                debug!("Group {} declares {} steps", label, group.steps.len());
            }
        }
    }

    errors
}

/// Validates the entire definition.
///
/// All problems are reported together in one [`PipelineError::Definition`].
pub fn validate_definition(
    definition: &PipelineDefinition,
    registry: &WorkRegistry,
) -> Result<(), PipelineError> {
    info!("Validating pipeline with {} steps", definition.steps.len());

    let errors = find_errors(definition, registry);
    if errors.is_empty() {
        info!("Pipeline definition is valid");
        return Ok(());
    }

    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    Err(PipelineError::Definition(messages.join("; ")))
}

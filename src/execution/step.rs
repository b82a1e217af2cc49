//! Individual Step Execution
//!
//! Runs one step's work and applies the error/exception policy:
//! - faults (`Err` returns and panics) are captured or abort the run
//! - malformed return values are downgraded to an `unknown` status
//! - `error` statuses are tolerated or abort the run
//!
//! The step's result is written in place before any abort is reported.

use std::any::Any;
use std::collections::BTreeMap;
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use log::{debug, info, warn};
use serde_json::Value;

use crate::error::PipelineError;
use crate::workflow::model::{Status, Step, StepResult, Unit};
use crate::workflow::work::{GlobalState, Globals, PipelineInfo, StepContext};

use super::pool::run_group;

/// Per-run overrides of the step error policy. `None` defers to the step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Policy {
    pub ignore_errors: Option<bool>,
    pub ignore_exceptions: Option<bool>,
}

impl Policy {
    pub fn ignore_errors_for(&self, step: &Step) -> bool {
        self.ignore_errors.unwrap_or(step.ignore_errors)
    }

    pub fn ignore_exceptions_for(&self, step: &Step) -> bool {
        self.ignore_exceptions.unwrap_or(step.ignore_exceptions)
    }
}

/// Pipeline state a unit may draw on while it runs.
pub(crate) struct ExecEnv<'a> {
    pub name: &'a str,
    pub paths: &'a BTreeMap<String, PathBuf>,
    pub globals: &'a mut GlobalState,
    pub run_step_idx: usize,
}

impl Unit {
    /// Executes the unit at position `env.run_step_idx` of the working list.
    pub(crate) fn execute(
        &mut self,
        env: ExecEnv<'_>,
        policy: Policy,
    ) -> Result<StepResult, PipelineError> {
        match self {
            Unit::Step(step) => {
                let info = PipelineInfo {
                    name: env.name,
                    paths: env.paths,
                    run_step_idx: env.run_step_idx,
                };
                run_step(
                    step,
                    Globals::Live(env.globals),
                    Some(info),
                    env.run_step_idx,
                    policy,
                )
            }
            Unit::Group(group) => run_group(group, env.globals, env.run_step_idx, policy),
        }
    }
}

/// Executes a single step and records its result.
///
/// # Returns
///
/// * `Ok(result)` - The step finished, or its failure was ignored
/// * `Err(StepFault)` - The work faulted and exceptions were not ignored
/// * `Err(StepErrorStatus)` - The work returned `error` and errors were not ignored
pub(crate) fn run_step(
    step: &mut Step,
    globals: Globals<'_>,
    pipeline: Option<PipelineInfo<'_>>,
    run_step_idx: usize,
    policy: Policy,
) -> Result<StepResult, PipelineError> {
    let step_id = step.id().unwrap_or_default().to_string();
    let ignore_exceptions = policy.ignore_exceptions_for(step);
    let ignore_errors = policy.ignore_errors_for(step);

    debug!("function kwargs: {:?}", step.kwargs);

    let outcome = {
        let mut ctx = StepContext::new(
            step.work.needs(),
            &step.kwargs,
            step.id.as_deref(),
            globals,
            pipeline,
        );
        invoke(step, &mut ctx)
    };

    let result = match outcome {
        Ok(value) => {
            let (result, well_formed) = StepResult::from_value(value);
            if !well_formed {
                warn!(
                    "Step {} (run_step_idx {}) did not return a valid result",
                    step_id, run_step_idx
                );
            }
            result
        }
        Err(diagnostic) => {
            let fault = StepResult::new(Status::Error).with("error", diagnostic.clone());
            step.result = Some(fault.clone());

            if !ignore_exceptions {
                return Err(PipelineError::StepFault {
                    step_id,
                    position: run_step_idx,
                    diagnostic,
                });
            }

            warn!(
                "Exception occurred during step {} (run_step_idx {})",
                step_id, run_step_idx
            );
            fault
        }
    };

    step.result = Some(result.clone());

    if result.status.is_error() {
        if !ignore_errors {
            return Err(PipelineError::StepErrorStatus {
                step_id,
                position: run_step_idx,
            });
        }
        warn!(
            "Error in step {} (run_step_idx {}), see results for more",
            step_id, run_step_idx
        );
    } else {
        info!("Step {} finished with status '{}'", step_id, result.status);
    }

    Ok(result)
}

/// Calls the work, turning `Err` returns and panics into a diagnostic.
fn invoke(step: &Step, ctx: &mut StepContext<'_>) -> Result<Value, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| step.work.call(ctx))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(describe_error(err.as_ref())),
        Err(payload) => Err(format!(
            "work '{}' panicked: {}",
            step.work.name(),
            panic_message(payload.as_ref())
        )),
    }
}

/// Formats an error with its full source chain.
pub(crate) fn describe_error(err: &(dyn Error + Send + Sync + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str("\nCaused by: ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::work::Work;
    use serde_json::json;
    use std::fmt;

    fn step_returning(value: Value) -> Step {
        Step::new(Work::new("fixed", move |_| Ok(value.clone()))).with_id("s")
    }

    fn failing_step() -> Step {
        Step::new(Work::new("fail", |_| Err("disk full".into()))).with_id("f")
    }

    fn run(step: &mut Step, policy: Policy) -> Result<StepResult, PipelineError> {
        let mut globals = GlobalState::new();
        run_step(step, Globals::Live(&mut globals), None, 3, policy)
    }

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "could not read frame")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_success_is_recorded() {
        let mut step = step_returning(json!({"status": "success", "n": 1}));
        let result = run(&mut step, Policy::default()).unwrap();
        assert_eq!(result.status, Status::Success);
        assert_eq!(step.result().unwrap().get("n"), Some(&json!(1)));
    }

    #[test]
    fn test_malformed_result_is_unknown_and_not_fatal() {
        let mut step = step_returning(json!("done"));
        let result = run(&mut step, Policy::default()).unwrap();
        assert_eq!(result.status, Status::Unknown);
        assert_eq!(result.get("result"), Some(&json!("done")));
    }

    #[test]
    fn test_error_status_aborts_by_default() {
        let mut step = step_returning(json!({"status": "Error"}));
        let err = run(&mut step, Policy::default()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StepErrorStatus { ref step_id, position: 3 } if step_id == "s"
        ));
        assert_eq!(step.result().unwrap().status, Status::Error);
    }

    #[test]
    fn test_error_status_ignored_by_step_flag() {
        let mut step = step_returning(json!({"status": "error"})).with_ignore_errors(true);
        let result = run(&mut step, Policy::default()).unwrap();
        assert!(result.status.is_error());
    }

    #[test]
    fn test_run_override_beats_step_flag() {
        let mut step = step_returning(json!({"status": "error"})).with_ignore_errors(true);
        let policy = Policy {
            ignore_errors: Some(false),
            ..Policy::default()
        };
        assert!(run(&mut step, policy).is_err());

        let mut step = step_returning(json!({"status": "error"}));
        let policy = Policy {
            ignore_errors: Some(true),
            ..Policy::default()
        };
        assert!(run(&mut step, policy).is_ok());
    }

    #[test]
    fn test_fault_aborts_without_ignore_exceptions() {
        let mut step = failing_step();
        let err = run(&mut step, Policy::default()).unwrap_err();
        match err {
            PipelineError::StepFault {
                step_id,
                position,
                diagnostic,
            } => {
                assert_eq!(step_id, "f");
                assert_eq!(position, 3);
                assert!(diagnostic.contains("disk full"));
            }
            other => panic!("Expected StepFault, got {:?}", other),
        }
    }

    #[test]
    fn test_ignored_fault_becomes_error_result() {
        let mut step = failing_step()
            .with_ignore_exceptions(true)
            .with_ignore_errors(true);
        let result = run(&mut step, Policy::default()).unwrap();
        assert_eq!(result.status, Status::Error);
        assert!(result.get("error").unwrap().as_str().unwrap().contains("disk full"));
    }

    #[test]
    fn test_ignored_fault_still_subject_to_error_policy() {
        let mut step = failing_step().with_ignore_exceptions(true);
        let err = run(&mut step, Policy::default()).unwrap_err();
        assert!(matches!(err, PipelineError::StepErrorStatus { .. }));
    }

    #[test]
    fn test_panic_is_a_fault() {
        let mut step = Step::new(Work::new("explode", |_| panic!("bad pixel"))).with_id("p");
        let err = run(&mut step, Policy::default()).unwrap_err();
        match err {
            PipelineError::StepFault { diagnostic, .. } => {
                assert!(diagnostic.contains("bad pixel"));
                assert!(diagnostic.contains("explode"));
            }
            other => panic!("Expected StepFault, got {:?}", other),
        }
    }

    #[test]
    fn test_describe_error_includes_sources() {
        let err: Box<dyn Error + Send + Sync> = Box::new(Outer(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "frame.fits missing",
        )));
        let text = describe_error(err.as_ref());
        assert!(text.starts_with("could not read frame"));
        assert!(text.contains("Caused by: frame.fits missing"));
    }

    #[test]
    fn test_step_sees_only_declared_capabilities() {
        let work = Work::new("report_id", |ctx| {
            Ok(json!({
                "status": "success",
                "id": ctx.step_id(),
                "has_globals": ctx.globals().is_some(),
            }))
        })
        .needs_step_id();
        let mut step = Step::new(work).with_id("report-1");

        let result = run(&mut step, Policy::default()).unwrap();
        assert_eq!(result.get("id"), Some(&json!("report-1")));
        assert_eq!(result.get("has_globals"), Some(&json!(false)));
    }

    #[test]
    fn test_sequential_step_can_write_globals() {
        let work = Work::new("count", |ctx| {
            let globals = ctx.globals_mut().ok_or("globals not injected")?;
            let seen = globals.get("seen").and_then(Value::as_u64).unwrap_or(0);
            globals.set("seen", seen + 1);
            Ok(json!({"status": "success"}))
        })
        .needs_globals();
        let mut step = Step::new(work).with_id("c");

        let mut globals = GlobalState::new();
        run_step(&mut step, Globals::Live(&mut globals), None, 0, Policy::default()).unwrap();
        run_step(&mut step, Globals::Live(&mut globals), None, 0, Policy::default()).unwrap();
        assert_eq!(globals.get("seen"), Some(&json!(2)));
    }
}

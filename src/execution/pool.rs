//! Concurrent Group Execution
//!
//! Fans the children of a [`ConcurrentGroup`] out over a fixed set of
//! scoped worker threads and joins them before the run loop continues.
//!
//! Workers pull `(position, step)` jobs from a shared queue and report back
//! over a channel; results are reassembled in declared child order. Each
//! worker sees the pipeline's global state as a read-only snapshot.

use std::collections::VecDeque;
use std::sync::mpsc::channel;
use std::sync::Mutex;
use std::thread;

use log::{debug, error, info};

use crate::error::PipelineError;
use crate::workflow::model::{ConcurrentGroup, Step, StepResult};
use crate::workflow::work::{GlobalState, Globals};

use super::step::{run_step, Policy};

type Job = (usize, Step);
type Completion = (usize, Step, Result<StepResult, PipelineError>);

/// Runs every child of `group` and stores the aggregate result.
///
/// All children run to completion even if some fail. Afterwards the first
/// child failure in declared order (an unignored fault or error status) is
/// returned, otherwise the aggregate result is.
pub(crate) fn run_group(
    group: &mut ConcurrentGroup,
    globals: &GlobalState,
    run_step_idx: usize,
    policy: Policy,
) -> Result<StepResult, PipelineError> {
    let group_id = group.id().unwrap_or_default().to_string();
    let total = group.steps.len();
    let workers = group.worker_count().max(1);
    let initializer = group.initializer.clone();

    info!(
        "Running group {} with {} steps on {} workers",
        group_id, total, workers
    );

    let queue: Mutex<VecDeque<Job>> =
        Mutex::new(std::mem::take(&mut group.steps).into_iter().enumerate().collect());
    let (tx, rx) = channel::<Completion>();
    let mut worker_panicked = false;

    thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let tx = tx.clone();
                let queue = &queue;
                let initializer = initializer.as_ref();

                scope.spawn(move || {
                    if let Some(init) = initializer {
                        debug!("Worker {} running initializer '{}'", worker, init.name());
                        init.call();
                    }

                    while let Some((position, mut step)) = next_job(queue) {
                        let outcome = run_step(
                            &mut step,
                            Globals::Snapshot(globals),
                            None,
                            run_step_idx,
                            policy,
                        );
                        if let Err(e) = tx.send((position, step, outcome)) {
                            error!("Failed to send completion signal: {}", e);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            if handle.join().is_err() {
                worker_panicked = true;
            }
        }
    });
    drop(tx);

    let mut slots: Vec<Option<Step>> = (0..total).map(|_| None).collect();
    let mut failures: Vec<(usize, PipelineError)> = Vec::new();

    for (position, step, outcome) in rx.iter() {
        if let Err(e) = outcome {
            failures.push((position, e));
        }
        slots[position] = Some(step);
    }

    // Jobs left behind by workers that died before taking them
    if let Ok(mut remaining) = queue.lock() {
        for (position, step) in remaining.drain(..) {
            slots[position] = Some(step);
        }
    }

    group.steps = slots.into_iter().flatten().collect();

    if worker_panicked || group.steps.len() != total {
        return Err(PipelineError::Internal(format!(
            "worker pool for group {} terminated abnormally",
            group_id
        )));
    }

    let aggregate = group.aggregate();
    info!("Group {} finished with status '{}'", group_id, aggregate.status);

    failures.sort_by_key(|(position, _)| *position);
    match failures.into_iter().next() {
        Some((_, err)) => Err(err),
        None => Ok(aggregate),
    }
}

fn next_job(queue: &Mutex<VecDeque<Job>>) -> Option<Job> {
    queue.lock().ok().and_then(|mut jobs| jobs.pop_front())
}

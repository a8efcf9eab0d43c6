// src/engine/event_handlers.rs

//! Event handling logic for the core state machine.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dag::{InputDecl, TaskStatus};
use crate::engine::core::RunState;
use crate::engine::{AttemptOutcome, AttemptReport, TaskName, retry_delay};
use crate::params::{ParamRef, ParamScope, Parameter};
use crate::types::FailurePolicy;

/// One attempt the shell should start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub task: TaskName,
    /// 1-based.
    pub attempt: u32,
    /// Wait this long before acquiring an environment (retry backoff).
    pub delay: Duration,
    /// Every declared input paired with the parameter it reads.
    pub inputs: Vec<(InputDecl, Parameter)>,
}

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    Dispatch(Dispatch),
    /// No pending task consumes this secret any more; drop its bytes.
    Forget(Parameter),
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// False once every task has reached a terminal status.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn dispatches(&self) -> impl Iterator<Item = &Dispatch> {
        self.commands.iter().filter_map(|c| match c {
            CoreCommand::Dispatch(d) => Some(d),
            CoreCommand::Forget(_) => None,
        })
    }
}

/// Seed the Run: release secrets nobody reads and dispatch the roots.
pub fn handle_start(state: &mut RunState) -> CoreStep {
    let mut commands = Vec::new();

    let unused: Vec<ParamRef> = state
        .consumers
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(r, _)| r.clone())
        .collect();
    for reference in unused {
        if let Some(param) = state.namespace.get(&reference) {
            commands.push(CoreCommand::Forget(param.clone()));
        }
    }

    dispatch_ready(state, &mut commands);
    finish(state, commands)
}

/// Handle the end of one attempt.
///
/// - Success records the declared outputs into the Run namespace before
///   re-evaluating readiness, so dependents always observe them.
/// - Failure with attempts left re-dispatches the task after its backoff;
///   the task stays `Running` meanwhile.
/// - Final failure applies the task's failure policy.
pub fn handle_attempt_finished(state: &mut RunState, report: AttemptReport) -> CoreStep {
    let mut commands = Vec::new();

    let Some(idx) = state.graph.index_of(&report.task) else {
        warn!(task = %report.task, "completion for unknown task ignored");
        return finish(state, commands);
    };
    if state.board.get(idx) != TaskStatus::Running || state.attempts[idx] != report.attempt {
        warn!(
            task = %report.task,
            attempt = report.attempt,
            status = %state.board.get(idx),
            "stale completion ignored"
        );
        return finish(state, commands);
    }

    if let Some(warning) = &report.teardown_warning {
        warn!(task = %report.task, attempt = report.attempt, %warning, "environment teardown failed");
        state.warnings.push(format!(
            "task '{}' attempt {}: teardown failed: {}",
            report.task, report.attempt, warning
        ));
    }

    let record = &mut state.records[idx];
    record.exit_code = report.exit_code;
    record.stderr_tail = report.stderr_tail;

    match report.outcome {
        AttemptOutcome::Succeeded { outputs } => {
            info!(task = %report.task, attempt = report.attempt, "task succeeded");
            for (name, value) in &outputs {
                let param = Parameter::output(&report.task, name, value.clone());
                state.namespace.insert(param.reference.clone(), param);
            }
            let record = &mut state.records[idx];
            record.outputs = outputs;
            record.error = None;
            state.board.set(idx, TaskStatus::Succeeded);
            settle(state, &[idx], &mut commands);
        }
        AttemptOutcome::Canceled => {
            info!(task = %report.task, attempt = report.attempt, "task canceled");
            state.board.set(idx, TaskStatus::Canceled);
            settle(state, &[idx], &mut commands);
        }
        AttemptOutcome::Failed { error, .. } => {
            let retry = state.graph.tasks()[idx].retry;
            if !state.canceled && retry.allows_retry_after(report.attempt) {
                info!(
                    task = %report.task,
                    attempt = report.attempt,
                    max_attempts = retry.max_attempts,
                    %error,
                    "attempt failed; retrying"
                );
                state.records[idx].error = Some(error);
                state.attempts[idx] += 1;
                match build_dispatch(state, idx) {
                    Ok(dispatch) => commands.push(CoreCommand::Dispatch(dispatch)),
                    Err(e) => fail_task(state, idx, e, &mut commands),
                }
            } else {
                warn!(task = %report.task, attempt = report.attempt, %error, "task failed");
                fail_task(state, idx, error, &mut commands);
            }
        }
    }

    dispatch_ready(state, &mut commands);
    finish(state, commands)
}

/// Stop dispatching; unstarted tasks become `Canceled` right away, running
/// ones when their worker reports back after teardown.
pub fn handle_cancel(state: &mut RunState) -> CoreStep {
    let mut commands = Vec::new();
    if !state.canceled {
        state.canceled = true;
        let running = state.board.count(TaskStatus::Running);
        info!(running, "cancellation requested; tearing down running tasks");
        let changed = state.board.mark_unstarted(TaskStatus::Canceled);
        settle(state, &changed, &mut commands);
    }
    finish(state, commands)
}

fn dispatch_ready(state: &mut RunState, commands: &mut Vec<CoreCommand>) {
    if state.halted || state.canceled {
        return;
    }

    for idx in state.graph.ready_indices(state.board.statuses()) {
        state.board.set(idx, TaskStatus::Ready);
    }

    let limit = state.options.concurrency.max(1);
    for idx in 0..state.graph.len() {
        if state.halted || state.board.count(TaskStatus::Running) >= limit {
            break;
        }
        if state.board.get(idx) != TaskStatus::Ready {
            continue;
        }

        state.board.set(idx, TaskStatus::Running);
        state.attempts[idx] = 1;
        match build_dispatch(state, idx) {
            Ok(dispatch) => {
                debug!(task = %dispatch.task, "dispatching task");
                commands.push(CoreCommand::Dispatch(dispatch));
            }
            Err(e) => fail_task(state, idx, e, commands),
        }
    }
}

fn build_dispatch(state: &RunState, idx: usize) -> Result<Dispatch, String> {
    let def = &state.graph.tasks()[idx];
    let attempt = state.attempts[idx];

    let mut inputs = Vec::with_capacity(def.inputs.len());
    for decl in &def.inputs {
        let param = match state.namespace.get(&decl.reference) {
            Some(param) => param.clone(),
            None => match decl.reference.scope {
                ParamScope::Run => Parameter::external(decl.reference.clone(), decl.secret),
                ParamScope::Task(_) => {
                    return Err(format!("input '{}' is not available", decl.reference));
                }
            },
        };
        inputs.push((decl.clone(), param));
    }

    Ok(Dispatch {
        task: def.name.clone(),
        attempt,
        delay: retry_delay(attempt, def.retry.backoff),
        inputs,
    })
}

fn fail_task(state: &mut RunState, idx: usize, error: String, commands: &mut Vec<CoreCommand>) {
    state.records[idx].error = Some(error);
    state.board.set(idx, TaskStatus::Failed);

    let mut changed = vec![idx];
    let skipped = state.board.mark_downstream_skipped(&state.graph, idx);
    if !skipped.is_empty() {
        let names: Vec<&str> = skipped
            .iter()
            .map(|&i| state.graph.tasks()[i].name.as_str())
            .collect();
        info!(task = %state.graph.tasks()[idx].name, skipped = ?names, "skipping downstream tasks");
    }
    changed.extend(skipped);

    if effective_policy(state, idx) == FailurePolicy::FailFast && !state.halted {
        info!(task = %state.graph.tasks()[idx].name, "fail-fast: no new tasks will be started");
        state.halted = true;
    }

    settle(state, &changed, commands);
}

fn effective_policy(state: &RunState, idx: usize) -> FailurePolicy {
    state
        .options
        .policy_override
        .or(state.graph.tasks()[idx].on_failure)
        .unwrap_or(state.options.default_policy)
}

/// Bookkeeping for tasks that just became terminal: drop one consumer from
/// each secret they read, forgetting the secret once nobody is left.
fn settle(state: &mut RunState, indices: &[usize], commands: &mut Vec<CoreCommand>) {
    for &idx in indices {
        let refs: BTreeSet<&ParamRef> = state.graph.tasks()[idx]
            .inputs
            .iter()
            .map(|d| &d.reference)
            .collect();
        for reference in refs {
            let Some(count) = state.consumers.get_mut(reference) else {
                continue;
            };
            if *count == 0 {
                continue;
            }
            *count -= 1;
            if *count == 0 {
                if let Some(param) = state.namespace.get(reference) {
                    commands.push(CoreCommand::Forget(param.clone()));
                }
            }
        }
    }
}

/// Once nothing is running, whatever has not started never will.
fn finish(state: &mut RunState, mut commands: Vec<CoreCommand>) -> CoreStep {
    if state.board.count(TaskStatus::Running) == 0 && !state.board.all_terminal() {
        let status = if state.canceled {
            TaskStatus::Canceled
        } else {
            TaskStatus::Skipped
        };
        let changed = state.board.mark_unstarted(status);
        settle(state, &changed, &mut commands);
    }

    CoreStep {
        commands,
        keep_running: !state.board.all_terminal(),
    }
}

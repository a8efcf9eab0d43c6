// src/engine/worker.rs

//! One task attempt, run on its own Tokio task.
//!
//! Order of operations:
//! 1. wait out the retry backoff (cancellable);
//! 2. resolve inputs through the parameter store;
//! 3. acquire an environment through a [`ContainerScope`];
//! 4. execute the body, racing it against cancellation;
//! 5. release the environment, on every path;
//! 6. report back to the engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dag::TaskDef;
use crate::engine::event_handlers::Dispatch;
use crate::engine::{AttemptOutcome, AttemptReport, RuntimeEvent, STDERR_TAIL_LINES};
use crate::errors::{ParameterError, TaskExecutionFailure};
use crate::exec::{AcquireRequest, ContainerAdapter, ContainerScope, ExecParams, ExecutionResult};
use crate::params::{ParameterStore, Redactor};

/// Shared handles every worker needs.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub store: Arc<ParameterStore>,
    pub adapter: Arc<dyn ContainerAdapter>,
    pub cancel: CancellationToken,
    pub events: mpsc::Sender<RuntimeEvent>,
}

pub(crate) async fn run_attempt(ctx: WorkerContext, def: TaskDef, dispatch: Dispatch) {
    let report = attempt(&ctx, &def, dispatch).await;
    if ctx
        .events
        .send(RuntimeEvent::AttemptFinished(report))
        .await
        .is_err()
    {
        debug!(task = %def.name, "engine gone; dropping attempt report");
    }
}

async fn attempt(ctx: &WorkerContext, def: &TaskDef, dispatch: Dispatch) -> AttemptReport {
    let task = dispatch.task.clone();
    let attempt = dispatch.attempt;

    if !dispatch.delay.is_zero() {
        debug!(task = %task, attempt, delay = ?dispatch.delay, "waiting before retry");
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return AttemptReport::new(task, attempt, AttemptOutcome::Canceled);
            }
            _ = tokio::time::sleep(dispatch.delay) => {}
        }
    }
    if ctx.cancel.is_cancelled() {
        return AttemptReport::new(task, attempt, AttemptOutcome::Canceled);
    }

    let params = match resolve_inputs(&ctx.store, &dispatch).await {
        Ok(params) => params,
        Err(e) => {
            warn!(task = %task, attempt, error = %e, "input resolution failed");
            return AttemptReport::failed(task, attempt, e.to_string());
        }
    };

    let request = AcquireRequest {
        task: task.clone(),
        attempt,
        container: def.container.clone(),
    };
    let scope = match ContainerScope::acquire(Arc::clone(&ctx.adapter), &request).await {
        Ok(scope) => scope,
        Err(e) => {
            warn!(task = %task, attempt, error = %e, "environment acquisition failed");
            return AttemptReport::failed(task, attempt, e.to_string());
        }
    };

    info!(task = %task, attempt, handle = %scope.handle_id(), cmd = %def.command, "running task body");
    let executed = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        result = scope.execute(&def.command, &params) => Some(result),
    };
    // Secret values are not needed past this point.
    drop(params);

    let teardown_warning = match scope.close().await {
        Ok(()) => None,
        Err(e) => Some(e.to_string()),
    };

    let mut report = match executed {
        None => {
            info!(task = %task, attempt, "task body interrupted by cancellation");
            AttemptReport::new(task, attempt, AttemptOutcome::Canceled)
        }
        Some(Err(e)) => AttemptReport::failed(task, attempt, e.to_string()),
        Some(Ok(mut result)) => {
            // Secrets resolved by other attempts while this body ran.
            scrub(&mut result, &ctx.store.redactor());
            let mut report = interpret(def, task, attempt, &result);
            report.stderr_tail = tail(&result.stderr, STDERR_TAIL_LINES);
            report
        }
    };
    report.teardown_warning = teardown_warning;
    report
}

/// Build the attempt environment. Every value marked secret, by the
/// parameter or by the input declaration, joins the Run's redaction set.
/// The attempt redacts with the whole set, declared inputs or not.
async fn resolve_inputs(
    store: &ParameterStore,
    dispatch: &Dispatch,
) -> Result<ExecParams, ParameterError> {
    let mut env = Vec::with_capacity(dispatch.inputs.len());

    for (decl, param) in &dispatch.inputs {
        let value = store.resolve(param).await?;
        if decl.secret || param.sensitive {
            store.register_secret(&value);
        }
        env.push((decl.env_var(), value));
    }
    Ok(ExecParams {
        env,
        redactor: store.redactor(),
    })
}

fn scrub(result: &mut ExecutionResult, redactor: &Redactor) {
    if redactor.is_empty() {
        return;
    }
    result.stdout = redactor.redact_to_string(result.stdout.as_bytes());
    result.stderr = redactor.redact_to_string(result.stderr.as_bytes());
    for value in result.produced_outputs.values_mut() {
        *value = redactor.redact_to_string(value.as_bytes());
    }
}

fn interpret(def: &TaskDef, task: String, attempt: u32, result: &ExecutionResult) -> AttemptReport {
    if !result.success() {
        let failure = TaskExecutionFailure::NonZeroExit(result.exit_code);
        return AttemptReport::new(
            task,
            attempt,
            AttemptOutcome::Failed {
                exit_code: Some(result.exit_code),
                error: failure.to_string(),
            },
        );
    }

    for name in result.produced_outputs.keys() {
        if !def.declares_output(name) {
            warn!(task = %task, output = %name, "ignoring undeclared output");
        }
    }

    let mut outputs = BTreeMap::new();
    for name in &def.outputs {
        match result.produced_outputs.get(name) {
            Some(value) => {
                outputs.insert(name.clone(), value.clone());
            }
            None => {
                let failure = TaskExecutionFailure::MissingOutput(name.clone());
                return AttemptReport::new(
                    task,
                    attempt,
                    AttemptOutcome::Failed {
                        exit_code: Some(result.exit_code),
                        error: failure.to_string(),
                    },
                );
            }
        }
    }

    AttemptReport::new(task, attempt, AttemptOutcome::Succeeded { outputs })
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::dag::TaskGraph;
use crate::exec::ContainerAdapter;
use crate::params::{ParameterStore, Parameter};

use super::core::CoreRun;
use super::event_handlers::{CoreCommand, Dispatch};
use super::run::RunResult;
use super::worker::{WorkerContext, run_attempt};
use super::{AttemptReport, EngineOptions, RuntimeEvent};

/// Async shell around [`CoreRun`].
///
/// Spawns one worker per dispatched attempt and feeds their completions,
/// plus the cancellation request, back into the core one event at a time.
pub struct Engine {
    store: Arc<ParameterStore>,
    adapter: Arc<dyn ContainerAdapter>,
    options: EngineOptions,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("store", &self.store)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(
        store: Arc<ParameterStore>,
        adapter: Arc<dyn ContainerAdapter>,
        options: EngineOptions,
    ) -> Self {
        Self {
            store,
            adapter,
            options,
        }
    }

    /// Execute `graph` to completion.
    ///
    /// `globals` are Run-global parameters already bound in the store.
    /// Cancelling `cancel` stops dispatching, tears down running attempts
    /// and cancels everything that has not started. Every secret left in
    /// the store is released before this returns.
    pub async fn run(
        &self,
        graph: TaskGraph,
        globals: Vec<Parameter>,
        cancel: CancellationToken,
    ) -> RunResult {
        info!(
            tasks = graph.len(),
            concurrency = self.options.concurrency,
            "run started"
        );

        let (tx, mut rx) = mpsc::channel::<RuntimeEvent>(64);
        let ctx = WorkerContext {
            store: Arc::clone(&self.store),
            adapter: Arc::clone(&self.adapter),
            cancel: cancel.clone(),
            events: tx,
        };

        let mut core = CoreRun::new(graph, self.options, globals);
        let mut step = core.start();
        let mut cancel_seen = false;

        loop {
            for command in step.commands.drain(..) {
                self.execute_command(&core, &ctx, command);
            }
            if !step.keep_running {
                break;
            }

            let event = tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        error!("completion channel closed with tasks still running");
                        break;
                    }
                },
                _ = cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    RuntimeEvent::CancelRequested
                }
            };

            debug!(?event, "engine received event");
            step = core.step(event);
        }

        self.store.teardown();
        let result = core.into_result();
        info!(status = %result.status, warnings = result.warnings.len(), "run finished");
        result
    }

    fn execute_command(&self, core: &CoreRun, ctx: &WorkerContext, command: CoreCommand) {
        match command {
            CoreCommand::Dispatch(dispatch) => self.spawn_attempt(core, ctx, dispatch),
            CoreCommand::Forget(param) => {
                self.store.forget(&param);
            }
        }
    }

    fn spawn_attempt(&self, core: &CoreRun, ctx: &WorkerContext, dispatch: Dispatch) {
        let Some(def) = core.graph().task(&dispatch.task).cloned() else {
            error!(task = %dispatch.task, "dispatch for unknown task");
            return;
        };
        let task = dispatch.task.clone();
        let attempt = dispatch.attempt;
        debug!(task = %task, attempt, "spawning attempt");

        let worker = tokio::spawn(run_attempt(ctx.clone(), def, dispatch));

        // A panicking worker still has to report, or the Run would wait on
        // it forever.
        let events = ctx.events.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.await {
                error!(task = %task, attempt, error = %e, "worker crashed");
                let report = AttemptReport::failed(task, attempt, format!("worker crashed: {e}"));
                let _ = events.send(RuntimeEvent::AttemptFinished(report)).await;
            }
        });
    }
}

/// Run `graph` with the given concurrency bound, default policies and no
/// external cancellation.
pub async fn run(
    graph: TaskGraph,
    concurrency_limit: usize,
    store: Arc<ParameterStore>,
    adapter: Arc<dyn ContainerAdapter>,
) -> RunResult {
    Engine::new(store, adapter, EngineOptions::new(concurrency_limit))
        .run(graph, Vec::new(), CancellationToken::new())
        .await
}

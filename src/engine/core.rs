// src/engine/core.rs

//! Pure core state machine of a Run.
//!
//! `CoreRun` consumes [`RuntimeEvent`]s and produces [`CoreStep`]s. It has
//! no channels, no Tokio types and performs no IO, so every scheduling
//! decision (readiness, concurrency bound, retries, failure policies,
//! cancellation, secret release) is testable synchronously.
//!
//! Status and namespace updates happen only here, one event at a time.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::dag::{RunStatus, StatusBoard, TaskGraph, TaskStatus};
use crate::engine::event_handlers::{
    CoreStep, handle_attempt_finished, handle_cancel, handle_start,
};
use crate::engine::run::{RunResult, TaskReport};
use crate::engine::{EngineOptions, RuntimeEvent};
use crate::params::{ParamRef, Parameter};

/// What the Run remembers about a task beyond its status.
#[derive(Debug, Clone, Default)]
pub(crate) struct TaskRecord {
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub stderr_tail: String,
    pub outputs: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct RunState {
    pub(crate) graph: TaskGraph,
    pub(crate) board: StatusBoard,
    /// Current attempt per task, 0 before the first dispatch.
    pub(crate) attempts: Vec<u32>,
    pub(crate) records: Vec<TaskRecord>,
    pub(crate) options: EngineOptions,
    /// Set by a fail-fast failure: nothing new is started.
    pub(crate) halted: bool,
    pub(crate) canceled: bool,
    /// Run parameter namespace: bound globals and task outputs.
    pub(crate) namespace: BTreeMap<ParamRef, Parameter>,
    /// Non-terminal consumers left per secret held in the vault.
    pub(crate) consumers: HashMap<ParamRef, usize>,
    pub(crate) warnings: Vec<String>,
}

#[derive(Debug)]
pub struct CoreRun {
    state: RunState,
}

impl CoreRun {
    /// `globals` are the Run-global parameters bound before the Run starts.
    pub fn new(graph: TaskGraph, options: EngineOptions, globals: Vec<Parameter>) -> Self {
        let len = graph.len();

        let namespace: BTreeMap<ParamRef, Parameter> = globals
            .into_iter()
            .map(|p| (p.reference.clone(), p))
            .collect();

        let mut consumers: HashMap<ParamRef, usize> = namespace
            .values()
            .filter(|p| p.sensitive)
            .map(|p| (p.reference.clone(), 0))
            .collect();
        for def in graph.tasks() {
            let refs: BTreeSet<&ParamRef> = def.inputs.iter().map(|d| &d.reference).collect();
            for reference in refs {
                if let Some(count) = consumers.get_mut(reference) {
                    *count += 1;
                }
            }
        }

        Self {
            state: RunState {
                board: StatusBoard::new(len),
                attempts: vec![0; len],
                records: vec![TaskRecord::default(); len],
                graph,
                options,
                halted: false,
                canceled: false,
                namespace,
                consumers,
                warnings: Vec::new(),
            },
        }
    }

    /// Initial dispatch. Call once, before any event.
    pub fn start(&mut self) -> CoreStep {
        handle_start(&mut self.state)
    }

    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::AttemptFinished(report) => {
                handle_attempt_finished(&mut self.state, report)
            }
            RuntimeEvent::CancelRequested => handle_cancel(&mut self.state),
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.state.graph
    }

    pub fn status_of(&self, task: &str) -> Option<TaskStatus> {
        self.state.graph.index_of(task).map(|i| self.state.board.get(i))
    }

    pub fn statuses(&self) -> &[TaskStatus] {
        self.state.board.statuses()
    }

    pub fn running_count(&self) -> usize {
        self.state.board.count(TaskStatus::Running)
    }

    pub fn is_finished(&self) -> bool {
        self.state.board.all_terminal()
    }

    pub fn parameter(&self, reference: &ParamRef) -> Option<&Parameter> {
        self.state.namespace.get(reference)
    }

    pub fn run_status(&self) -> RunStatus {
        if self.state.canceled {
            RunStatus::Canceled
        } else if self.state.board.any(TaskStatus::Failed) {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        }
    }

    /// Aggregate everything into the final result.
    pub fn into_result(self) -> RunResult {
        let status = self.run_status();
        let state = self.state;

        let tasks = state
            .graph
            .tasks()
            .iter()
            .enumerate()
            .map(|(i, def)| {
                let record = &state.records[i];
                TaskReport {
                    name: def.name.clone(),
                    status: state.board.get(i),
                    attempts: state.attempts[i],
                    exit_code: record.exit_code,
                    error: record.error.clone(),
                    stderr_tail: record.stderr_tail.clone(),
                    outputs: record.outputs.clone(),
                    history: state.board.history(i).to_vec(),
                }
            })
            .collect();

        RunResult {
            status,
            tasks,
            parameters: state.namespace.values().map(Parameter::snapshot).collect(),
            warnings: state.warnings,
        }
    }
}

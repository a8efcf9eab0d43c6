// src/engine/mod.rs

//! Execution engine.
//!
//! The pure core state machine lives in [`core`] and [`event_handlers`]:
//! it consumes [`RuntimeEvent`]s and answers with commands (dispatch an
//! attempt, forget a secret). The async shell in [`runtime`] owns the
//! completion channel, spawns one [`worker`] per attempt and executes the
//! commands. [`run`] holds the aggregated result of a Run.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::types::FailurePolicy;

/// Canonical task name type used throughout the engine.
pub type TaskName = String;

/// How one attempt of a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Exit 0 with every declared output present.
    Succeeded { outputs: BTreeMap<String, String> },
    /// Non-zero exit, missing output, or an adapter/parameter error.
    Failed {
        exit_code: Option<i32>,
        error: String,
    },
    /// Interrupted by Run cancellation; its environment has been torn down.
    Canceled,
}

/// Sent by a worker once its attempt is over and its container released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    pub task: TaskName,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub exit_code: Option<i32>,
    /// Redacted tail of the body's stderr.
    pub stderr_tail: String,
    /// Set when releasing the attempt's environment failed.
    pub teardown_warning: Option<String>,
}

impl AttemptReport {
    pub fn new(task: impl Into<TaskName>, attempt: u32, outcome: AttemptOutcome) -> Self {
        let exit_code = match &outcome {
            AttemptOutcome::Succeeded { .. } => Some(0),
            AttemptOutcome::Failed { exit_code, .. } => *exit_code,
            AttemptOutcome::Canceled => None,
        };
        Self {
            task: task.into(),
            attempt,
            outcome,
            exit_code,
            stderr_tail: String::new(),
            teardown_warning: None,
        }
    }

    pub fn failed(task: impl Into<TaskName>, attempt: u32, error: impl Into<String>) -> Self {
        Self::new(
            task,
            attempt,
            AttemptOutcome::Failed {
                exit_code: None,
                error: error.into(),
            },
        )
    }
}

/// Events flowing into the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    AttemptFinished(AttemptReport),
    CancelRequested,
}

/// Knobs of one Run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Upper bound on tasks in `Running` at once. Values below 1 act as 1.
    pub concurrency: usize,
    /// Policy for tasks that do not set their own.
    pub default_policy: FailurePolicy,
    /// Forces one policy on every task (CLI `--on-failure`).
    pub policy_override: Option<FailurePolicy>,
}

impl EngineOptions {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Self::default()
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            default_policy: FailurePolicy::FailFast,
            policy_override: None,
        }
    }
}

/// Lines of stderr kept in a report.
pub const STDERR_TAIL_LINES: usize = 20;

/// Fixed delay before a retry attempt; zero for first attempts.
pub(crate) fn retry_delay(attempt: u32, backoff: Duration) -> Duration {
    if attempt > 1 { backoff } else { Duration::ZERO }
}

pub mod core;
pub mod event_handlers;
pub mod run;
pub mod runtime;
pub mod worker;

pub use core::CoreRun;
pub use event_handlers::{CoreCommand, CoreStep, Dispatch};
pub use run::{RunResult, TaskReport};
pub use runtime::{Engine, run};

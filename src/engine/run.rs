// src/engine/run.rs

//! Aggregated result of a Run.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;

use crate::dag::{RunStatus, TaskStatus};
use crate::engine::TaskName;
use crate::params::ParameterSnapshot;

/// Final state of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReport {
    pub name: TaskName,
    pub status: TaskStatus,
    /// Attempts started; 0 if the task never ran.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Redacted.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr_tail: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    /// Every status the task went through, oldest first.
    pub history: Vec<TaskStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub tasks: Vec<TaskReport>,
    /// Run namespace at the end. Sensitive entries carry no value.
    pub parameters: Vec<ParameterSnapshot>,
    /// Run-level warnings, e.g. environments that failed to tear down.
    pub warnings: Vec<String>,
}

impl RunResult {
    pub fn task(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn status_of(&self, name: &str) -> Option<TaskStatus> {
        self.task(name).map(|t| t.status)
    }

    /// Per-task status sequences, in declaration order.
    pub fn history(&self) -> Vec<(&str, &[TaskStatus])> {
        self.tasks
            .iter()
            .map(|t| (t.name.as_str(), t.history.as_slice()))
            .collect()
    }

    /// JSON snapshot of the Run.
    pub fn snapshot(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable report.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let width = self.tasks.iter().map(|t| t.name.len()).max().unwrap_or(0);

        for task in &self.tasks {
            let _ = write!(out, "{:<width$}  {:<9}", task.name, task.status.to_string());
            if task.attempts > 1 {
                let _ = write!(out, "  attempts={}", task.attempts);
            }
            if let Some(code) = task.exit_code {
                if code != 0 {
                    let _ = write!(out, "  exit={code}");
                }
            }
            if let Some(error) = &task.error {
                if task.status == TaskStatus::Failed {
                    let _ = write!(out, "  error: {error}");
                }
            }
            out.push('\n');
            if task.status == TaskStatus::Failed {
                for line in task.stderr_tail.lines() {
                    let _ = writeln!(out, "{:width$}  | {line}", "");
                }
            }
        }

        for warning in &self.warnings {
            let _ = writeln!(out, "warning: {warning}");
        }
        let _ = writeln!(out, "run {}", self.status);
        out
    }
}

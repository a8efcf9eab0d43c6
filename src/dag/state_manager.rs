// src/dag/state_manager.rs

//! Per-Run task status bookkeeping.

use tracing::debug;

use crate::dag::TaskGraph;
use crate::dag::status::TaskStatus;

/// Status of every task in a Run, indexed by declaration order, plus the
/// sequence of statuses each task went through.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    statuses: Vec<TaskStatus>,
    history: Vec<Vec<TaskStatus>>,
}

impl StatusBoard {
    /// Every task starts `Pending`.
    pub fn new(len: usize) -> Self {
        Self {
            statuses: vec![TaskStatus::Pending; len],
            history: vec![vec![TaskStatus::Pending]; len],
        }
    }

    pub fn statuses(&self) -> &[TaskStatus] {
        &self.statuses
    }

    pub fn get(&self, idx: usize) -> TaskStatus {
        self.statuses[idx]
    }

    /// Statuses `idx` went through, oldest first.
    pub fn history(&self, idx: usize) -> &[TaskStatus] {
        &self.history[idx]
    }

    /// Move a task to `status`. Repeating the current status is a no-op.
    pub fn set(&mut self, idx: usize, status: TaskStatus) {
        if self.statuses[idx] == status {
            return;
        }
        debug!(task_index = idx, from = %self.statuses[idx], to = %status, "task status change");
        self.statuses[idx] = status;
        self.history[idx].push(status);
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.statuses.iter().filter(|&&s| s == status).count()
    }

    pub fn any(&self, status: TaskStatus) -> bool {
        self.statuses.contains(&status)
    }

    pub fn all_terminal(&self) -> bool {
        self.statuses.iter().all(|s| s.is_terminal())
    }

    /// Mark every not-yet-started task downstream of `failed` as `Skipped`.
    ///
    /// Returns the indices that changed.
    pub fn mark_downstream_skipped(&mut self, graph: &TaskGraph, failed: usize) -> Vec<usize> {
        let mut skipped = Vec::new();
        for idx in graph.downstream_indices(failed) {
            if matches!(self.statuses[idx], TaskStatus::Pending | TaskStatus::Ready) {
                self.set(idx, TaskStatus::Skipped);
                skipped.push(idx);
            }
        }
        skipped
    }

    /// Move every task that has not started yet (`Pending` or `Ready`) to
    /// `status`. Returns the indices that changed.
    pub fn mark_unstarted(&mut self, status: TaskStatus) -> Vec<usize> {
        let mut changed = Vec::new();
        for idx in 0..self.statuses.len() {
            if matches!(self.statuses[idx], TaskStatus::Pending | TaskStatus::Ready) {
                self.set(idx, status);
                changed.push(idx);
            }
        }
        changed
    }
}

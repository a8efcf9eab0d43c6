// src/dag/mod.rs

//! Task graph representation.
//!
//! - [`task`] holds the static task declarations.
//! - [`graph`] validates declarations into an immutable, acyclic
//!   [`TaskGraph`] and answers readiness / downstream queries.
//! - [`status`] defines per-task and per-Run statuses.
//! - [`state_manager`] tracks the statuses of one Run.
//!
//! Nothing here executes anything.

pub mod graph;
pub mod state_manager;
pub mod status;
pub mod task;

pub use graph::TaskGraph;
pub use state_manager::StatusBoard;
pub use status::{RunStatus, TaskStatus};
pub use task::{
    CommandSpec, ContainerSpec, InputDecl, Mount, ResourceLimits, RetryPolicy, TaskDef,
};

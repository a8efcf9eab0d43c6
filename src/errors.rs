// src/errors.rs

//! Error taxonomy shared by every layer of the engine.
//!
//! Messages name tasks, parameters and containers. They never carry a
//! parameter value.

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::TaskName;

/// Structural problems found while building a [`crate::dag::TaskGraph`].
///
/// All of these are detected before anything executes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate task '{0}'")]
    DuplicateTask(TaskName),

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: TaskName, dependency: TaskName },

    #[error("dependency cycle detected: {}", path.join(" -> "))]
    CycleDetected { path: Vec<TaskName> },

    #[error("invalid task name '{0}' (allowed: letters, digits, '_' and '-')")]
    InvalidTaskName(String),

    #[error("task '{task}' reads '{input}', which no upstream task declares as an output")]
    UnreachableInput { task: TaskName, input: String },

    #[error("unknown target task '{0}'")]
    UnknownTarget(TaskName),
}

/// Failures of the parameter layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParameterError {
    #[error("parameter '{name}' not found")]
    NotFound { name: String },

    #[error("parameter backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("access to parameter '{name}' denied: {reason}")]
    AccessDenied { name: String, reason: String },
}

/// Failures of the container adapter.
///
/// A non-zero exit of the task body is *not* a `ContainerError`; see
/// [`TaskExecutionFailure`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContainerError {
    #[error("image '{image}' unavailable: {reason}")]
    ImageUnavailable { image: String, reason: String },

    #[error("resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),

    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("teardown of '{handle}' failed: {reason}")]
    TeardownFailed { handle: String, reason: String },
}

/// The task body itself ran but did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskExecutionFailure {
    #[error("task exited with code {0}")]
    NonZeroExit(i32),

    #[error("task did not publish declared output '{0}'")]
    MissingOutput(String),
}

/// Problems with the task-definition file or the runner settings in it.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum ParciError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ParciError>;

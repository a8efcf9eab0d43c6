// src/exec/backend.rs

//! Container adapter abstraction.
//!
//! The engine talks to a `ContainerAdapter` instead of a concrete runtime.
//! Production code uses [`SystemAdapter`], which routes tasks with a
//! container spec to Docker and the rest to the host shell; tests swap in a
//! scripted fake.
//!
//! Contract:
//! - `acquire` creates one isolated environment for one task attempt.
//! - `execute` reports a non-zero exit as a normal `ExecutionResult`.
//! - `release` consumes the handle; callers go through
//!   [`ContainerScope`](super::scope::ContainerScope) so it runs on every
//!   exit path.

use std::collections::BTreeMap;
use std::fmt;

use crate::BoxFuture;
use crate::config::ContainerSettings;
use crate::dag::{CommandSpec, ContainerSpec};
use crate::engine::TaskName;
use crate::errors::ContainerError;
use crate::params::{Redactor, SecretValue};

use super::docker::DockerRuntime;
use super::host::{HiddenEnv, HostRuntime};

pub trait ContainerAdapter: Send + Sync {
    fn acquire<'a>(
        &'a self,
        request: &'a AcquireRequest,
    ) -> BoxFuture<'a, Result<ContainerHandle, ContainerError>>;

    fn execute<'a>(
        &'a self,
        handle: &'a ContainerHandle,
        command: &'a CommandSpec,
        params: &'a ExecParams,
    ) -> BoxFuture<'a, Result<ExecutionResult, ContainerError>>;

    fn release(&self, handle: ContainerHandle) -> BoxFuture<'_, Result<(), ContainerError>>;
}

/// What a task attempt needs from the adapter.
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub task: TaskName,
    /// 1-based attempt number.
    pub attempt: u32,
    /// `None` runs the body on the host.
    pub container: Option<ContainerSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleKind {
    Docker { name: String },
    Host,
}

/// One live execution environment, bound to exactly one task attempt.
///
/// Not `Clone`: the handle is owned by the attempt that acquired it and
/// given back through `release`.
#[derive(Debug, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub task: TaskName,
    pub attempt: u32,
    pub kind: HandleKind,
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Per-execution inputs: resolved environment plus the redactor over every
/// secret the Run has seen so far.
#[derive(Debug, Clone, Default)]
pub struct ExecParams {
    pub env: Vec<(String, SecretValue)>,
    pub redactor: Redactor,
}

/// Outcome of running a task body. `stdout`/`stderr` are already redacted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub produced_outputs: BTreeMap<String, String>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Production adapter: Docker for containerized tasks, the host shell for
/// the rest.
#[derive(Debug, Clone)]
pub struct SystemAdapter {
    docker: DockerRuntime,
    host: HostRuntime,
}

impl SystemAdapter {
    pub fn new(settings: &ContainerSettings) -> Self {
        Self {
            docker: DockerRuntime::new(settings),
            host: HostRuntime::new(settings.capture_limit_bytes),
        }
    }

    /// Replace the set of runner variables host bodies must not inherit.
    pub fn with_hidden_env(mut self, hidden: HiddenEnv) -> Self {
        self.host = self.host.with_hidden_env(hidden);
        self
    }
}

impl ContainerAdapter for SystemAdapter {
    fn acquire<'a>(
        &'a self,
        request: &'a AcquireRequest,
    ) -> BoxFuture<'a, Result<ContainerHandle, ContainerError>> {
        Box::pin(async move {
            match &request.container {
                Some(spec) => self.docker.acquire(&request.task, request.attempt, spec).await,
                None => Ok(self.host.acquire(&request.task, request.attempt)),
            }
        })
    }

    fn execute<'a>(
        &'a self,
        handle: &'a ContainerHandle,
        command: &'a CommandSpec,
        params: &'a ExecParams,
    ) -> BoxFuture<'a, Result<ExecutionResult, ContainerError>> {
        Box::pin(async move {
            match &handle.kind {
                HandleKind::Docker { name } => {
                    self.docker.execute(handle, name, command, params).await
                }
                HandleKind::Host => self.host.execute(handle, command, params).await,
            }
        })
    }

    fn release(&self, handle: ContainerHandle) -> BoxFuture<'_, Result<(), ContainerError>> {
        Box::pin(async move {
            match &handle.kind {
                HandleKind::Docker { name } => self.docker.release(&handle, name).await,
                HandleKind::Host => Ok(()),
            }
        })
    }
}

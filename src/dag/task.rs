// src/dag/task.rs

//! Static task declarations: what to run, where, and with which inputs.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::engine::TaskName;
use crate::params::ParamRef;
use crate::types::FailurePolicy;

/// Command body of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    /// Run through `/bin/sh -c`.
    Shell(String),
    /// Exec'd directly, no shell.
    Argv(Vec<String>),
}

impl CommandSpec {
    /// Argument vector handed to the process or container runtime.
    pub fn to_argv(&self) -> Vec<String> {
        match self {
            CommandSpec::Shell(script) => {
                vec!["/bin/sh".to_string(), "-c".to_string(), script.clone()]
            }
            CommandSpec::Argv(argv) => argv.clone(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSpec::Shell(script) => f.write_str(script),
            CommandSpec::Argv(argv) => write!(f, "{}", argv.join(" ")),
        }
    }
}

/// A bind mount into the task container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    /// Parse `source:target[:ro|:rw]`.
    pub fn parse(spec: &str) -> Option<Mount> {
        let mut parts = spec.splitn(3, ':');
        let source = parts.next().filter(|s| !s.is_empty())?;
        let target = parts.next().filter(|s| !s.is_empty())?;
        let read_only = match parts.next() {
            None | Some("rw") => false,
            Some("ro") => true,
            Some(_) => return None,
        };
        Some(Mount {
            source: source.to_string(),
            target: target.to_string(),
            read_only,
        })
    }

    /// Docker `--volume` syntax.
    pub fn to_volume_arg(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceLimits {
    pub cpus: Option<f64>,
    pub memory_mb: Option<u64>,
}

/// Isolation requirements for a task. Absent means "run on the host".
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub resources: ResourceLimits,
    pub mounts: Vec<Mount>,
    pub workdir: Option<String>,
    /// Plain, non-secret environment for the container.
    pub env: BTreeMap<String, String>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            resources: ResourceLimits::default(),
            mounts: Vec::new(),
            workdir: None,
            env: BTreeMap::new(),
        }
    }
}

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always >= 1.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

/// One declared input of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDecl {
    pub reference: ParamRef,
    /// Resolve through the secret path and redact from captured output.
    pub secret: bool,
    /// Environment variable name override.
    pub env: Option<String>,
}

impl InputDecl {
    pub fn plain(reference: ParamRef) -> Self {
        Self {
            reference,
            secret: false,
            env: None,
        }
    }

    pub fn secret(reference: ParamRef) -> Self {
        Self {
            reference,
            secret: true,
            env: None,
        }
    }

    /// Environment variable the value is injected as.
    ///
    /// Defaults to the parameter name upper-cased, with anything outside
    /// `[A-Z0-9_]` replaced by `_`.
    pub fn env_var(&self) -> String {
        match &self.env {
            Some(name) => name.clone(),
            None => env_var_name(&self.reference.name),
        }
    }
}

pub(crate) fn env_var_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// A task as declared by the loader, before graph validation.
#[derive(Debug, Clone)]
pub struct TaskDef {
    pub name: TaskName,
    pub command: CommandSpec,
    pub depends_on: Vec<TaskName>,
    pub container: Option<ContainerSpec>,
    pub inputs: Vec<InputDecl>,
    pub outputs: Vec<String>,
    pub retry: RetryPolicy,
    /// Per-task failure policy; `None` defers to the Run default.
    pub on_failure: Option<FailurePolicy>,
}

impl TaskDef {
    pub fn new(name: impl Into<TaskName>, command: CommandSpec) -> Self {
        Self {
            name: name.into(),
            command,
            depends_on: Vec::new(),
            container: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            retry: RetryPolicy::default(),
            on_failure: None,
        }
    }

    pub fn declares_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }
}

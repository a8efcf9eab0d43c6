// src/config/validate.rs

use std::collections::HashSet;
use std::time::Duration;

use crate::config::model::{
    ContainerSettings, ParamsSettings, ProjectConfig, RawCommand, RawConfigFile, RawContainer,
    RawInput, RawTask,
};
use crate::dag::{
    CommandSpec, ContainerSpec, InputDecl, Mount, ResourceLimits, RetryPolicy, TaskDef,
};
use crate::errors::ConfigError;
use crate::params::ParamRef;
use crate::types::BackendKind;

/// Concurrency used when `[config].concurrency` is absent, at most.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

impl TryFrom<RawConfigFile> for ProjectConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfigFile) -> Result<Self, Self::Error> {
        ensure_has_tasks(&raw)?;
        validate_params(&raw.params)?;
        validate_container(&raw.container)?;

        let concurrency = match raw.config.concurrency {
            Some(0) => {
                return Err(invalid("[config].concurrency must be >= 1 (got 0)"));
            }
            Some(n) => n,
            None => raw.tasks.len().clamp(1, DEFAULT_MAX_CONCURRENCY),
        };

        let tasks = raw
            .tasks
            .into_iter()
            .map(convert_task)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ProjectConfig {
            concurrency,
            on_failure: raw.config.on_failure,
            params: raw.params,
            container: raw.container,
            tasks,
        })
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<(), ConfigError> {
    if cfg.tasks.is_empty() {
        return Err(invalid("config must contain at least one [[task]] record"));
    }
    Ok(())
}

fn validate_params(params: &ParamsSettings) -> Result<(), ConfigError> {
    if params.namespace.trim().is_empty() {
        return Err(invalid("[params].namespace must not be empty"));
    }
    match params.backend {
        BackendKind::Env => {
            if params.prefix.is_empty() {
                return Err(invalid("[params].prefix must not be empty"));
            }
        }
        BackendKind::File => {
            if params.path.is_none() {
                return Err(invalid("[params].path is required for the file backend"));
            }
        }
        BackendKind::ExternalService => {
            let Some(url) = &params.url else {
                return Err(invalid(
                    "[params].url is required for the external-service backend",
                ));
            };
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid(format!(
                    "[params].url must be an http(s) URL (got '{url}')"
                )));
            }
            if params.timeout_ms == 0 {
                return Err(invalid("[params].timeout_ms must be >= 1"));
            }
        }
    }
    Ok(())
}

fn validate_container(container: &ContainerSettings) -> Result<(), ConfigError> {
    if container.binary.trim().is_empty() {
        return Err(invalid("[container].binary must not be empty"));
    }
    if container.teardown_timeout_secs == 0 {
        return Err(invalid("[container].teardown_timeout_secs must be >= 1"));
    }
    if container.capture_limit_bytes == 0 {
        return Err(invalid("[container].capture_limit_bytes must be >= 1"));
    }
    if let Some(cpus) = container.max_cpus {
        if !(cpus.is_finite() && cpus > 0.0) {
            return Err(invalid("[container].max_cpus must be a positive number"));
        }
    }
    Ok(())
}

fn convert_task(raw: RawTask) -> Result<TaskDef, ConfigError> {
    let name = raw.name;

    let command = match raw.cmd {
        RawCommand::Shell(script) if script.trim().is_empty() => {
            return Err(invalid(format!("task '{name}' has an empty `cmd`")));
        }
        RawCommand::Shell(script) => CommandSpec::Shell(script),
        RawCommand::Argv(argv) if argv.is_empty() || argv[0].trim().is_empty() => {
            return Err(invalid(format!("task '{name}' has an empty `cmd` array")));
        }
        RawCommand::Argv(argv) => CommandSpec::Argv(argv),
    };

    let container = raw
        .container
        .map(|c| convert_container(&name, c))
        .transpose()?;

    let mut inputs = Vec::with_capacity(raw.inputs.len());
    for input in raw.inputs {
        inputs.push(convert_input(&name, input)?);
    }

    let mut seen = HashSet::new();
    for output in &raw.outputs {
        if output.is_empty() || output.contains('.') || output.contains('=') {
            return Err(invalid(format!(
                "task '{name}' declares an invalid output name '{output}'"
            )));
        }
        if !seen.insert(output.as_str()) {
            return Err(invalid(format!(
                "task '{name}' declares output '{output}' twice"
            )));
        }
    }

    let retry = match raw.retry {
        None => RetryPolicy::default(),
        Some(r) => {
            if r.max_attempts == 0 {
                return Err(invalid(format!(
                    "task '{name}': retry.max_attempts must be >= 1"
                )));
            }
            if !(r.backoff_secs.is_finite() && r.backoff_secs >= 0.0) {
                return Err(invalid(format!(
                    "task '{name}': retry.backoff_secs must be a non-negative number"
                )));
            }
            RetryPolicy::new(r.max_attempts, Duration::from_secs_f64(r.backoff_secs))
        }
    };

    Ok(TaskDef {
        name,
        command,
        depends_on: raw.depends_on,
        container,
        inputs,
        outputs: raw.outputs,
        retry,
        on_failure: raw.on_failure,
    })
}

fn convert_container(task: &str, raw: RawContainer) -> Result<ContainerSpec, ConfigError> {
    if raw.image.trim().is_empty() {
        return Err(invalid(format!("task '{task}': container.image is empty")));
    }
    if let Some(cpus) = raw.cpus {
        if !(cpus.is_finite() && cpus > 0.0) {
            return Err(invalid(format!(
                "task '{task}': container.cpus must be a positive number"
            )));
        }
    }
    if raw.memory_mb == Some(0) {
        return Err(invalid(format!(
            "task '{task}': container.memory_mb must be >= 1"
        )));
    }

    let mounts = raw
        .mounts
        .iter()
        .map(|m| {
            Mount::parse(m).ok_or_else(|| {
                invalid(format!(
                    "task '{task}': invalid mount '{m}' (expected source:target[:ro|:rw])"
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ContainerSpec {
        image: raw.image,
        resources: ResourceLimits {
            cpus: raw.cpus,
            memory_mb: raw.memory_mb,
        },
        mounts,
        workdir: raw.workdir,
        env: raw.env,
    })
}

fn convert_input(task: &str, raw: RawInput) -> Result<InputDecl, ConfigError> {
    let (reference, secret, env) = match raw {
        RawInput::Ref(r) => (r, false, None),
        RawInput::Table {
            reference,
            secret,
            env,
        } => (reference, secret, env),
    };

    let reference: ParamRef = reference
        .parse()
        .map_err(|e: String| invalid(format!("task '{task}': {e}")))?;

    if let Some(var) = &env {
        let valid = !var.is_empty()
            && !var.starts_with(|c: char| c.is_ascii_digit())
            && var.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(invalid(format!(
                "task '{task}': invalid environment variable name '{var}'"
            )));
        }
    }

    Ok(InputDecl {
        reference,
        secret,
        env,
    })
}

// src/exec/docker.rs

//! Docker CLI driver.
//!
//! Each task attempt gets its own detached container (`parci-ctnr-<uuid>`)
//! that idles until the body is exec'd into it, and is force-removed on
//! release. Secret values reach the container through the docker client's
//! own environment plus `-e NAME` flags, so they never show up in argv.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ContainerSettings;
use crate::dag::{CommandSpec, ContainerSpec};
use crate::errors::ContainerError;

use super::backend::{ContainerHandle, ExecParams, ExecutionResult, HandleKind};
use super::process::{apply_env, run_captured};

pub const CONTAINER_PREFIX: &str = "parci-ctnr-";

const IDLE_SCRIPT: &str = "trap 'exit 0' TERM INT; while :; do sleep 1; done";

#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
    teardown_timeout: Duration,
    max_cpus: Option<f64>,
    max_memory_mb: Option<u64>,
    capture_limit: usize,
}

impl DockerRuntime {
    pub fn new(settings: &ContainerSettings) -> Self {
        Self {
            binary: settings.binary.clone(),
            teardown_timeout: Duration::from_secs(settings.teardown_timeout_secs),
            max_cpus: settings.max_cpus,
            max_memory_mb: settings.max_memory_mb,
            capture_limit: settings.capture_limit_bytes,
        }
    }

    /// Reject requests above the configured ceilings before touching the
    /// runtime.
    pub fn check_limits(&self, task: &str, spec: &ContainerSpec) -> Result<(), ContainerError> {
        if let (Some(requested), Some(max)) = (spec.resources.cpus, self.max_cpus) {
            if requested > max {
                return Err(ContainerError::ResourceLimitExceeded(format!(
                    "task '{task}' requests {requested} CPUs, the limit is {max}"
                )));
            }
        }
        if let (Some(requested), Some(max)) = (spec.resources.memory_mb, self.max_memory_mb) {
            if requested > max {
                return Err(ContainerError::ResourceLimitExceeded(format!(
                    "task '{task}' requests {requested} MiB of memory, the limit is {max} MiB"
                )));
            }
        }
        Ok(())
    }

    pub async fn acquire(
        &self,
        task: &str,
        attempt: u32,
        spec: &ContainerSpec,
    ) -> Result<ContainerHandle, ContainerError> {
        self.check_limits(task, spec)?;

        let name = format!("{CONTAINER_PREFIX}{}", uuid::Uuid::new_v4());
        let args = run_args(&name, task, spec);
        debug!(task, attempt, container = %name, image = %spec.image, "creating container");

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // A failed `run` can still leave a created container behind.
            self.remove(&name).await.ok();
            return Err(classify_run_failure(&spec.image, stderr.trim()));
        }

        info!(task, attempt, container = %name, image = %spec.image, "container started");
        Ok(ContainerHandle {
            id: name.clone(),
            task: task.to_string(),
            attempt,
            kind: HandleKind::Docker { name },
        })
    }

    pub async fn execute(
        &self,
        handle: &ContainerHandle,
        name: &str,
        command: &CommandSpec,
        params: &ExecParams,
    ) -> Result<ExecutionResult, ContainerError> {
        let env_names: Vec<&str> = params.env.iter().map(|(k, _)| k.as_str()).collect();
        let mut cmd = Command::new(&self.binary);
        cmd.args(exec_args(name, &env_names, command));
        apply_env(&mut cmd, &params.env);

        let result = run_captured(cmd, handle, &params.redactor, self.capture_limit)
            .await
            .map_err(|e| self.spawn_error(e))?;

        if result.exit_code != 0 && is_missing_container(&result.stderr) {
            return Err(ContainerError::RuntimeUnavailable(format!(
                "container {name} disappeared during execution"
            )));
        }
        Ok(result)
    }

    pub async fn release(&self, handle: &ContainerHandle, name: &str) -> Result<(), ContainerError> {
        match tokio::time::timeout(self.teardown_timeout, self.remove(name)).await {
            Ok(Ok(())) => {
                info!(task = %handle.task, attempt = handle.attempt, container = %name, "container removed");
                Ok(())
            }
            Ok(Err(reason)) => {
                warn!(task = %handle.task, container = %name, %reason, "container teardown failed");
                Err(ContainerError::TeardownFailed {
                    handle: name.to_string(),
                    reason,
                })
            }
            Err(_) => {
                warn!(task = %handle.task, container = %name, "container teardown timed out");
                Err(ContainerError::TeardownFailed {
                    handle: name.to_string(),
                    reason: format!("timed out after {:?}", self.teardown_timeout),
                })
            }
        }
    }

    async fn remove(&self, name: &str) -> Result<(), String> {
        let output = Command::new(&self.binary)
            .args(rm_args(name))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("cannot run {}: {e}", self.binary))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.success() || is_missing_container(&stderr) {
            Ok(())
        } else {
            Err(stderr.trim().to_string())
        }
    }

    fn spawn_error(&self, e: io::Error) -> ContainerError {
        ContainerError::RuntimeUnavailable(format!("cannot run {}: {e}", self.binary))
    }
}

/// Arguments for `docker container run` creating an idle container.
pub fn run_args(name: &str, task: &str, spec: &ContainerSpec) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "container".into(),
        "run".into(),
        "--detach".into(),
        "--name".into(),
        name.into(),
        "--label".into(),
        format!("parci.task={task}"),
    ];
    if let Some(cpus) = spec.resources.cpus {
        args.push("--cpus".into());
        args.push(cpus.to_string());
    }
    if let Some(memory) = spec.resources.memory_mb {
        args.push("--memory".into());
        args.push(format!("{memory}m"));
    }
    for mount in &spec.mounts {
        args.push("--volume".into());
        args.push(mount.to_volume_arg());
    }
    if let Some(workdir) = &spec.workdir {
        args.push("--workdir".into());
        args.push(workdir.clone());
    }
    for (key, value) in &spec.env {
        args.push("--env".into());
        args.push(format!("{key}={value}"));
    }
    args.extend([
        "--entrypoint".into(),
        "/bin/sh".into(),
        spec.image.clone(),
        "-c".into(),
        IDLE_SCRIPT.into(),
    ]);
    args
}

/// Arguments for `docker container exec`. Only variable names are passed.
pub fn exec_args(name: &str, env_names: &[&str], command: &CommandSpec) -> Vec<String> {
    let mut args: Vec<String> = vec!["container".into(), "exec".into()];
    for env in env_names {
        args.push("--env".into());
        args.push((*env).to_string());
    }
    args.push(name.into());
    args.extend(command.to_argv());
    args
}

pub fn rm_args(name: &str) -> Vec<String> {
    vec![
        "container".into(),
        "rm".into(),
        "--force".into(),
        "--volumes".into(),
        name.into(),
    ]
}

/// Map a failed `docker run` to the error taxonomy.
pub fn classify_run_failure(image: &str, stderr: &str) -> ContainerError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
        || lower.contains("error during connect")
    {
        ContainerError::RuntimeUnavailable(stderr.to_string())
    } else if lower.contains("unable to find image")
        || lower.contains("pull access denied")
        || lower.contains("manifest unknown")
        || lower.contains("not found: manifest")
        || lower.contains("invalid reference format")
    {
        ContainerError::ImageUnavailable {
            image: image.to_string(),
            reason: stderr.to_string(),
        }
    } else if lower.contains("range of cpus")
        || lower.contains("minimum memory limit")
        || lower.contains("cannot be greater than")
    {
        ContainerError::ResourceLimitExceeded(stderr.to_string())
    } else {
        ContainerError::RuntimeUnavailable(stderr.to_string())
    }
}

fn is_missing_container(stderr: &str) -> bool {
    stderr.to_ascii_lowercase().contains("no such container")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{Mount, ResourceLimits};

    fn settings() -> ContainerSettings {
        ContainerSettings {
            max_cpus: Some(2.0),
            max_memory_mb: Some(512),
            ..ContainerSettings::default()
        }
    }

    #[test]
    fn run_args_carry_limits_mounts_and_plain_env() {
        let mut spec = ContainerSpec::new("alpine:3.20");
        spec.resources = ResourceLimits {
            cpus: Some(1.5),
            memory_mb: Some(256),
        };
        spec.mounts.push(Mount::parse("./src:/src:ro").unwrap());
        spec.workdir = Some("/src".into());
        spec.env.insert("MODE".into(), "ci".into());

        let args = run_args("parci-ctnr-x", "build", &spec);
        let joined = args.join(" ");
        assert!(joined.starts_with("container run --detach --name parci-ctnr-x"));
        assert!(joined.contains("--cpus 1.5"));
        assert!(joined.contains("--memory 256m"));
        assert!(joined.contains("--volume ./src:/src:ro"));
        assert!(joined.contains("--workdir /src"));
        assert!(joined.contains("--env MODE=ci"));
        assert!(joined.contains("--entrypoint /bin/sh alpine:3.20 -c"));
    }

    #[test]
    fn exec_args_never_contain_values() {
        let args = exec_args(
            "parci-ctnr-x",
            &["API_TOKEN"],
            &CommandSpec::Shell("echo hi".into()),
        );
        assert_eq!(
            args,
            vec![
                "container", "exec", "--env", "API_TOKEN", "parci-ctnr-x", "/bin/sh", "-c",
                "echo hi"
            ]
        );
    }

    #[test]
    fn limits_are_checked_before_the_runtime() {
        let rt = DockerRuntime::new(&settings());
        let mut spec = ContainerSpec::new("alpine");
        spec.resources.cpus = Some(4.0);
        assert!(matches!(
            rt.check_limits("t", &spec),
            Err(ContainerError::ResourceLimitExceeded(_))
        ));

        spec.resources.cpus = Some(2.0);
        spec.resources.memory_mb = Some(1024);
        assert!(matches!(
            rt.check_limits("t", &spec),
            Err(ContainerError::ResourceLimitExceeded(_))
        ));

        spec.resources.memory_mb = Some(512);
        assert!(rt.check_limits("t", &spec).is_ok());
    }

    #[test]
    fn classifies_common_run_failures() {
        let e = classify_run_failure(
            "nope:latest",
            "Unable to find image 'nope:latest' locally\npull access denied for nope",
        );
        assert!(matches!(e, ContainerError::ImageUnavailable { .. }));

        let e = classify_run_failure(
            "alpine",
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?",
        );
        assert!(matches!(e, ContainerError::RuntimeUnavailable(_)));

        let e = classify_run_failure("alpine", "Range of CPUs is from 0.01 to 8.00");
        assert!(matches!(e, ContainerError::ResourceLimitExceeded(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_runtime_unavailable() {
        let rt = DockerRuntime::new(&ContainerSettings {
            binary: "parci-no-such-docker-binary".into(),
            ..ContainerSettings::default()
        });
        let err = rt
            .acquire("t", 1, &ContainerSpec::new("alpine"))
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::RuntimeUnavailable(_)));
    }
}

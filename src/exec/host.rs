// src/exec/host.rs

//! Runs task bodies directly on the host, for tasks without a container spec.
//!
//! A host body inherits the runner's environment minus [`HiddenEnv`]: the
//! parameter-backend credentials, every variable under the env backend
//! prefix and the sources of `--secret-env`. A task gets those values only
//! through declared inputs.

use std::collections::BTreeSet;

use tokio::process::Command;
use tracing::debug;

use crate::config::ParamsSettings;
use crate::dag::CommandSpec;
use crate::errors::ContainerError;

use super::backend::{ContainerHandle, ExecParams, ExecutionResult, HandleKind};
use super::process::{apply_env, run_captured};

/// Variables of the runner's own environment that host bodies never see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HiddenEnv {
    names: BTreeSet<String>,
    prefixes: BTreeSet<String>,
}

impl HiddenEnv {
    /// Credentials and backend variables named by the `[params]` section.
    pub fn for_params(settings: &ParamsSettings) -> Self {
        let mut hidden = Self::default()
            .hide(&settings.passphrase_env)
            .hide_prefix(&settings.prefix);
        if let Some(token_env) = &settings.token_env {
            hidden = hidden.hide(token_env);
        }
        hidden
    }

    pub fn hide(mut self, name: &str) -> Self {
        if !name.is_empty() {
            self.names.insert(name.to_string());
        }
        self
    }

    pub fn hide_prefix(mut self, prefix: &str) -> Self {
        if !prefix.is_empty() {
            self.prefixes.insert(prefix.to_string());
        }
        self
    }

    pub fn hides(&self, name: &str) -> bool {
        self.names.contains(name) || self.prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    fn apply(&self, cmd: &mut Command) {
        for (key, _) in std::env::vars_os() {
            if key.to_str().is_some_and(|k| self.hides(k)) {
                cmd.env_remove(&key);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostRuntime {
    capture_limit: usize,
    hidden: HiddenEnv,
}

impl HostRuntime {
    /// Hides the default `[params]` credentials until told otherwise.
    pub fn new(capture_limit: usize) -> Self {
        Self {
            capture_limit,
            hidden: HiddenEnv::for_params(&ParamsSettings::default()),
        }
    }

    pub fn with_hidden_env(mut self, hidden: HiddenEnv) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn acquire(&self, task: &str, attempt: u32) -> ContainerHandle {
        let id = format!("host-{}", uuid::Uuid::new_v4());
        debug!(task, attempt, handle = %id, "acquired host environment");
        ContainerHandle {
            id,
            task: task.to_string(),
            attempt,
            kind: HandleKind::Host,
        }
    }

    pub async fn execute(
        &self,
        handle: &ContainerHandle,
        command: &CommandSpec,
        params: &ExecParams,
    ) -> Result<ExecutionResult, ContainerError> {
        let argv = command.to_argv();
        let Some((program, args)) = argv.split_first() else {
            return Err(ContainerError::RuntimeUnavailable(format!(
                "task '{}' has an empty command",
                handle.task
            )));
        };

        let mut cmd = Command::new(program);
        cmd.args(args);
        self.hidden.apply(&mut cmd);
        // Declared inputs win, even under a hidden name.
        apply_env(&mut cmd, &params.env);

        run_captured(cmd, handle, &params.redactor, self.capture_limit)
            .await
            .map_err(|e| {
                ContainerError::RuntimeUnavailable(format!("cannot start '{program}': {e}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_section_names_the_hidden_variables() {
        let settings = ParamsSettings {
            passphrase_env: "VAULT_PASS".into(),
            token_env: Some("SERVICE_TOKEN".into()),
            prefix: "CI_PARAM_".into(),
            ..ParamsSettings::default()
        };
        let hidden = HiddenEnv::for_params(&settings).hide("DEPLOY_KEY_SOURCE");

        assert!(hidden.hides("VAULT_PASS"));
        assert!(hidden.hides("SERVICE_TOKEN"));
        assert!(hidden.hides("CI_PARAM_REGISTRY"));
        assert!(hidden.hides("DEPLOY_KEY_SOURCE"));
        assert!(!hidden.hides("PATH"));
        assert!(!hidden.hides("CI_PARAMS"));
    }

    #[test]
    fn defaults_cover_the_default_params_section() {
        let runtime = HostRuntime::new(1024);
        assert!(runtime.hidden.hides("PARCI_PARAMETER_DB_PASSWORD"));
        assert!(runtime.hidden.hides("PARCI_PARAM_TOKEN"));
        assert!(!runtime.hidden.hides("HOME"));
    }

    #[test]
    fn empty_names_hide_nothing() {
        let hidden = HiddenEnv::default().hide("").hide_prefix("");
        assert!(!hidden.hides("ANYTHING"));
    }
}

// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::dag::TaskDef;
use crate::exec::process::DEFAULT_CAPTURE_LIMIT;
use crate::types::{BackendKind, FailurePolicy};

/// Top-level task-definition file as read from TOML.
///
/// ```toml
/// [config]
/// concurrency = 2
/// on_failure = "isolate-branch"
///
/// [params]
/// backend = "file"
/// path = ".parci/params.json"
///
/// [container]
/// max_cpus = 4
///
/// [[task]]
/// name = "build"
/// cmd = "make"
/// container = { image = "rust:1.85", mounts = [".:/src"], workdir = "/src" }
/// outputs = ["artifact"]
///
/// [[task]]
/// name = "publish"
/// cmd = ["./publish.sh"]
/// depends_on = ["build"]
/// inputs = ["build.artifact", { ref = "registry_token", secret = true }]
/// retry = { max_attempts = 3, backoff_secs = 2 }
/// ```
///
/// Tasks are an array so their declaration order survives parsing.
/// Semantic checks live in `validate.rs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub params: ParamsSettings,

    #[serde(default)]
    pub container: ContainerSettings,

    #[serde(default, rename = "task")]
    pub tasks: Vec<RawTask>,
}

/// `[config]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Defaults to the number of tasks, capped at 4.
    pub concurrency: Option<usize>,

    #[serde(default)]
    pub on_failure: FailurePolicy,
}

/// `[params]` section: which backend supplies Run-global parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParamsSettings {
    pub backend: BackendKind,
    /// Backend namespace the Run reads from.
    pub namespace: String,
    pub read_only: bool,

    /// env: variable prefix.
    pub prefix: String,

    /// file: location of the encrypted parameter file.
    pub path: Option<PathBuf>,
    /// file: variable holding the passphrase.
    pub passphrase_env: String,

    /// external-service: base URL.
    pub url: Option<String>,
    /// external-service: variable holding the bearer token.
    pub token_env: Option<String>,
    pub timeout_ms: u64,
}

pub const DEFAULT_PARAM_PREFIX: &str = "PARCI_PARAM_";
pub const DEFAULT_PASSPHRASE_ENV: &str = "PARCI_PARAMETER_DB_PASSWORD";

impl Default for ParamsSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Env,
            namespace: "default".to_string(),
            read_only: true,
            prefix: DEFAULT_PARAM_PREFIX.to_string(),
            path: None,
            passphrase_env: DEFAULT_PASSPHRASE_ENV.to_string(),
            url: None,
            token_env: None,
            timeout_ms: 10_000,
        }
    }
}

/// `[container]` section: runtime and ceilings for containerized tasks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContainerSettings {
    pub binary: String,
    pub teardown_timeout_secs: u64,
    pub max_cpus: Option<f64>,
    pub max_memory_mb: Option<u64>,
    /// Per stream.
    pub capture_limit_bytes: usize,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            teardown_timeout_secs: 30,
            max_cpus: None,
            max_memory_mb: None,
            capture_limit_bytes: DEFAULT_CAPTURE_LIMIT,
        }
    }
}

/// One `[[task]]` record.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTask {
    pub name: String,

    pub cmd: RawCommand,

    #[serde(default, alias = "after")]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub container: Option<RawContainer>,

    #[serde(default)]
    pub inputs: Vec<RawInput>,

    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default)]
    pub retry: Option<RawRetry>,

    #[serde(default)]
    pub on_failure: Option<FailurePolicy>,
}

/// A string runs through the shell; an array is exec'd as-is.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawCommand {
    Shell(String),
    Argv(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawContainer {
    pub image: String,
    pub cpus: Option<f64>,
    pub memory_mb: Option<u64>,
    /// `source:target[:ro|:rw]`
    #[serde(default)]
    pub mounts: Vec<String>,
    pub workdir: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawInput {
    Ref(String),
    Table {
        #[serde(rename = "ref")]
        reference: String,
        #[serde(default)]
        secret: bool,
        #[serde(default)]
        env: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRetry {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff_secs: f64,
}

fn default_max_attempts() -> u32 {
    1
}

/// Validated project: runner settings plus task declarations in file order.
///
/// Structural graph checks (cycles, unknown dependencies, unreachable
/// inputs) happen when the declarations are turned into a `TaskGraph`.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub concurrency: usize,
    pub on_failure: FailurePolicy,
    pub params: ParamsSettings,
    pub container: ContainerSettings,
    pub tasks: Vec<TaskDef>,
}

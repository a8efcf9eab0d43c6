use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a task failure affects the rest of the Run.
///
/// - `FailFast` (default): downstream tasks are skipped and nothing new is
///   launched anywhere in the graph; work already in flight drains.
/// - `IsolateBranch`: only the failed task's downstream subgraph is skipped;
///   unrelated branches keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    #[default]
    FailFast,
    IsolateBranch,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail-fast" => Ok(FailurePolicy::FailFast),
            "isolate-branch" => Ok(FailurePolicy::IsolateBranch),
            other => Err(format!(
                "invalid failure policy: {other} (expected \"fail-fast\" or \"isolate-branch\")"
            )),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::FailFast => f.write_str("fail-fast"),
            FailurePolicy::IsolateBranch => f.write_str("isolate-branch"),
        }
    }
}

/// Which parameter backend a Run reads external values from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Process environment, snapshotted at Run start.
    #[default]
    Env,
    /// Local encrypted parameter file.
    File,
    /// Remote key/value secret service over HTTP.
    ExternalService,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "env" => Ok(BackendKind::Env),
            "file" => Ok(BackendKind::File),
            "external-service" => Ok(BackendKind::ExternalService),
            other => Err(format!(
                "invalid parameter backend: {other} (expected \"env\", \"file\" or \"external-service\")"
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Env => f.write_str("env"),
            BackendKind::File => f.write_str("file"),
            BackendKind::ExternalService => f.write_str("external-service"),
        }
    }
}

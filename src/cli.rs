// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::types::FailurePolicy;

/// Command-line arguments for `parci`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "parci",
    version,
    about = "Run CI tasks locally, in dependency order, each in its own container.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the task-definition file (TOML).
    #[arg(long, global = true, value_name = "PATH", default_value = "Parci.toml")]
    pub config: PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PARCI_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Execute the task graph.
    Run(RunArgs),
    /// List declared tasks and their dependencies.
    Tasks,
    /// Manage values in the configured parameter backend.
    Param {
        #[command(subcommand)]
        action: ParamCommand,
    },
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Run only these tasks plus everything they depend on. Repeatable.
    #[arg(long = "target", value_name = "NAME")]
    pub targets: Vec<String>,

    /// Maximum number of tasks running at once.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub concurrency: Option<u64>,

    /// Override every task's failure policy (fail-fast, isolate-branch).
    #[arg(long, value_name = "POLICY")]
    pub on_failure: Option<FailurePolicy>,

    /// Bind a plain Run-global parameter. Repeatable.
    #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,

    /// Bind a secret Run-global parameter from an environment variable.
    /// Repeatable. The value itself never appears on the command line.
    #[arg(long = "secret-env", value_name = "NAME=ENV_VAR", value_parser = parse_key_value)]
    pub secret_env: Vec<(String, String)>,

    /// Validate and print the execution plan without running anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Format of the final report on stdout.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub report: ReportFormat,
}

#[derive(Debug, Clone, Subcommand)]
pub enum ParamCommand {
    /// Create a new encrypted parameter file (file backend only).
    Init,
    /// Store a value. Read from stdin unless `--from-env` is given.
    Set {
        key: String,
        /// Read the value from this environment variable instead.
        #[arg(long, value_name = "ENV_VAR")]
        from_env: Option<String>,
    },
    /// Delete a value.
    Rm { key: String },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{s}'")),
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_flags() {
        let args = CliArgs::try_parse_from([
            "parci",
            "run",
            "--target",
            "deploy",
            "--concurrency",
            "2",
            "--on-failure",
            "isolate-branch",
            "--param",
            "channel=beta",
            "--secret-env",
            "token=CI_TOKEN",
            "--report",
            "json",
        ])
        .unwrap();

        let Command::Run(run) = args.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(run.targets, vec!["deploy"]);
        assert_eq!(run.concurrency, Some(2));
        assert_eq!(run.on_failure, Some(FailurePolicy::IsolateBranch));
        assert_eq!(run.params, vec![("channel".to_string(), "beta".to_string())]);
        assert_eq!(run.secret_env, vec![("token".to_string(), "CI_TOKEN".to_string())]);
        assert_eq!(run.report, ReportFormat::Json);
    }

    #[test]
    fn rejects_zero_concurrency_and_bad_pairs() {
        assert!(CliArgs::try_parse_from(["parci", "run", "--concurrency", "0"]).is_err());
        assert!(CliArgs::try_parse_from(["parci", "run", "--param", "novalue"]).is_err());
    }

    #[test]
    fn param_set_takes_key_only() {
        let args = CliArgs::try_parse_from(["parci", "param", "set", "db_password"]).unwrap();
        match args.command {
            Command::Param {
                action: ParamCommand::Set { key, from_env },
            } => {
                assert_eq!(key, "db_password");
                assert!(from_env.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}

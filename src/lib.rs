// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod params;
pub mod types;

use std::future::Future;
use std::io::Read;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command, ParamCommand, ReportFormat, RunArgs};
use crate::config::{ProjectConfig, load_and_validate};
use crate::dag::{RunStatus, TaskGraph};
use crate::engine::{Engine, EngineOptions};
use crate::errors::{ConfigError, GraphError, ParameterError, ParciError};
use crate::exec::{HiddenEnv, SystemAdapter};
use crate::fs::RealFileSystem;
use crate::params::{
    FileBackend, KdfCost, ParamRef, Parameter, ParameterStore, SecretValue, StoreOptions,
    open_backend,
};
use crate::types::BackendKind;

/// Boxed future returned by the adapter and backend traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const TASK_FAILED: i32 = 1;
    pub const INVALID_CONFIG: i32 = 2;
    pub const PARAMETER_BACKEND: i32 = 3;
    pub const CANCELED: i32 = 130;
}

/// High-level entry point used by `main.rs`. Returns the exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    match args.command {
        Command::Run(run_args) => run_tasks(&args.config, run_args).await,
        Command::Tasks => {
            let cfg = load_and_validate(&args.config)?;
            let graph = TaskGraph::build(cfg.tasks.clone())?;
            print_tasks(&graph);
            Ok(exit_code::SUCCESS)
        }
        Command::Param { action } => {
            let cfg = load_and_validate(&args.config)?;
            manage_params(&cfg, action).await?;
            Ok(exit_code::SUCCESS)
        }
    }
}

/// Exit code for an error that escaped [`run`].
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(err) = err.downcast_ref::<ParciError>() {
        return match err {
            ParciError::Config(_) | ParciError::Graph(_) => exit_code::INVALID_CONFIG,
            ParciError::Parameter(_) => exit_code::PARAMETER_BACKEND,
            ParciError::Container(_) | ParciError::Io(_) | ParciError::Other(_) => {
                exit_code::TASK_FAILED
            }
        };
    }
    if err.downcast_ref::<ConfigError>().is_some() || err.downcast_ref::<GraphError>().is_some() {
        exit_code::INVALID_CONFIG
    } else if err.downcast_ref::<ParameterError>().is_some() {
        exit_code::PARAMETER_BACKEND
    } else {
        exit_code::TASK_FAILED
    }
}

/// Validated inputs of a Run: settings, the (possibly narrowed) graph and
/// engine options.
pub fn plan_run(
    config_path: &Path,
    args: &RunArgs,
) -> errors::Result<(ProjectConfig, TaskGraph, EngineOptions)> {
    let cfg = load_and_validate(config_path)?;
    let mut graph = TaskGraph::build(cfg.tasks.clone())?;
    if !args.targets.is_empty() {
        graph = graph.select(&args.targets)?;
        info!(targets = ?args.targets, tasks = graph.len(), "selected targets");
    }

    let options = EngineOptions {
        concurrency: args
            .concurrency
            .map(|n| n as usize)
            .unwrap_or(cfg.concurrency),
        default_policy: cfg.on_failure,
        policy_override: args.on_failure,
    };
    Ok((cfg, graph, options))
}

fn open_store(
    cfg: &ProjectConfig,
    args: &RunArgs,
) -> errors::Result<(Arc<ParameterStore>, Vec<Parameter>)> {
    let backend = open_backend(&cfg.params)?;
    let store = Arc::new(ParameterStore::new(
        backend,
        StoreOptions {
            namespace: cfg.params.namespace.clone(),
            read_only: cfg.params.read_only,
        },
    ));
    let globals = bind_globals(&store, args)?;
    Ok((store, globals))
}

async fn run_tasks(config_path: &Path, args: RunArgs) -> Result<i32> {
    let (cfg, graph, options) = plan_run(config_path, &args)?;

    if args.dry_run {
        print_dry_run(&cfg, &graph, &options);
        return Ok(exit_code::SUCCESS);
    }

    let (store, globals) = open_store(&cfg, &args)?;

    let hidden = args
        .secret_env
        .iter()
        .fold(HiddenEnv::for_params(&cfg.params), |hidden, (_, var)| {
            hidden.hide(var)
        });
    let adapter = Arc::new(SystemAdapter::new(&cfg.container).with_hidden_env(hidden));

    // Ctrl-C → cooperative cancellation of the Run.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; canceling run");
            cancel.cancel();
        });
    }

    let engine = Engine::new(store, adapter, options);
    let result = engine.run(graph, globals, cancel).await;

    match args.report {
        ReportFormat::Text => print!("{}", result.render_text()),
        ReportFormat::Json => println!(
            "{}",
            result.snapshot().context("serializing run report")?
        ),
    }

    Ok(match result.status {
        RunStatus::Succeeded => exit_code::SUCCESS,
        RunStatus::Failed => exit_code::TASK_FAILED,
        RunStatus::Canceled => exit_code::CANCELED,
    })
}

/// Bind `--param` values as plain and `--secret-env` values as secret
/// Run-global parameters.
fn bind_globals(store: &ParameterStore, args: &RunArgs) -> Result<Vec<Parameter>, ParameterError> {
    let mut globals = Vec::new();
    for (name, value) in &args.params {
        globals.push(store.bind(ParamRef::run(name), SecretValue::from(value.as_str()), false));
    }
    for (name, var) in &args.secret_env {
        let value = std::env::var_os(var).ok_or_else(|| ParameterError::NotFound {
            name: format!("{name} (from ${var})"),
        })?;
        globals.push(store.bind(ParamRef::run(name), secret_from_os(value), true));
    }
    debug!(count = globals.len(), "bound run-global parameters");
    Ok(globals)
}

#[cfg(unix)]
fn secret_from_os(value: std::ffi::OsString) -> SecretValue {
    use std::os::unix::ffi::OsStringExt;
    SecretValue::new(value.into_vec())
}

#[cfg(not(unix))]
fn secret_from_os(value: std::ffi::OsString) -> SecretValue {
    SecretValue::from(value.to_string_lossy().into_owned())
}

async fn manage_params(cfg: &ProjectConfig, action: ParamCommand) -> Result<()> {
    if let ParamCommand::Init = action {
        if cfg.params.backend != BackendKind::File {
            bail!(ConfigError::Invalid(format!(
                "`param init` needs the file backend (configured: {})",
                cfg.params.backend
            )));
        }
        let path = cfg
            .params
            .path
            .clone()
            .ok_or_else(|| ConfigError::Invalid("[params].path is not set".to_string()))?;
        let passphrase = zeroize::Zeroizing::new(std::env::var(&cfg.params.passphrase_env).map_err(
            |_| ParameterError::AccessDenied {
                name: cfg.params.passphrase_env.clone(),
                reason: "passphrase environment variable is not set".to_string(),
            },
        )?);
        FileBackend::init(
            &path,
            passphrase.as_bytes(),
            KdfCost::default(),
            Arc::new(RealFileSystem),
        )?;
        println!("initialized {}", path.display());
        return Ok(());
    }

    // Explicit management commands always write.
    let store = ParameterStore::new(
        open_backend(&cfg.params)?,
        StoreOptions {
            namespace: cfg.params.namespace.clone(),
            read_only: false,
        },
    );

    match action {
        ParamCommand::Init => Ok(()),
        ParamCommand::Set { key, from_env } => {
            let value = match from_env {
                Some(var) => secret_from_os(std::env::var_os(&var).ok_or_else(|| {
                    ParameterError::NotFound {
                        name: format!("${var}"),
                    }
                })?),
                None => read_stdin_value()?,
            };
            store.store(&key, &value).await?;
            println!("stored '{key}' in namespace '{}'", store.namespace());
            Ok(())
        }
        ParamCommand::Rm { key } => {
            store.remove(&key).await?;
            println!("removed '{key}' from namespace '{}'", store.namespace());
            Ok(())
        }
    }
}

/// Whole stdin, minus one trailing newline.
fn read_stdin_value() -> Result<SecretValue> {
    let mut buf = zeroize::Zeroizing::new(Vec::new());
    std::io::stdin()
        .read_to_end(&mut buf)
        .context("reading value from stdin")?;
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(SecretValue::new(buf.to_vec()))
}

fn print_tasks(graph: &TaskGraph) {
    for def in graph.tasks() {
        let deps = graph.dependencies_of(&def.name);
        let place = match &def.container {
            Some(spec) => spec.image.as_str(),
            None => "host",
        };
        if deps.is_empty() {
            println!("{}  [{}]", def.name, place);
        } else {
            println!("{}  [{}]  after: {}", def.name, place, deps.join(", "));
        }
    }
}

/// Validated plan: settings, then tasks wave by wave.
fn print_dry_run(cfg: &ProjectConfig, graph: &TaskGraph, options: &EngineOptions) {
    println!("parci dry-run");
    println!("  concurrency = {}", options.concurrency);
    println!(
        "  on_failure = {}{}",
        options.policy_override.unwrap_or(options.default_policy),
        if options.policy_override.is_some() {
            " (override)"
        } else {
            ""
        }
    );
    println!("  params.backend = {}", cfg.params.backend);
    println!();

    for (wave, names) in graph.levels().iter().enumerate() {
        println!("wave {}:", wave + 1);
        for name in names {
            let Some(def) = graph.task(name) else {
                continue;
            };
            println!("  - {name}");
            println!("      cmd: {}", def.command);
            if !def.depends_on.is_empty() {
                println!("      depends_on: {:?}", def.depends_on);
            }
            if let Some(spec) = &def.container {
                println!("      image: {}", spec.image);
            }
            if !def.inputs.is_empty() {
                let inputs: Vec<String> = def
                    .inputs
                    .iter()
                    .map(|i| {
                        if i.secret {
                            format!("{} (secret)", i.reference)
                        } else {
                            i.reference.to_string()
                        }
                    })
                    .collect();
                println!("      inputs: {}", inputs.join(", "));
            }
            if !def.outputs.is_empty() {
                println!("      outputs: {}", def.outputs.join(", "));
            }
            if def.retry.max_attempts > 1 {
                println!(
                    "      retry: {} attempts, {:?} backoff",
                    def.retry.max_attempts, def.retry.backoff
                );
            }
        }
    }

    debug!("dry-run complete (no execution)");
}

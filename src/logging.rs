// src/logging.rs

//! Tracing subscriber for the `parci` binary.
//!
//! The filter comes from, in order:
//! 1. `--log-level` on the command line, applied to every target;
//! 2. `PARCI_LOG`, read as `EnvFilter` directives (`debug`,
//!    `parci::engine=trace,info`, ...);
//! 3. `info`.
//!
//! Output goes to STDERR. STDOUT is reserved for the Run report.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "PARCI_LOG";

// The HTTP client logs request lines at debug; keep it quiet unless asked.
const QUIET_TARGETS: &[&str] = &["hyper_util=warn", "reqwest=warn", "rustls=warn"];

pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV).ok();
    let filter = build_filter(cli_level, env.as_deref());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))?;

    Ok(())
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    let base = match (cli_level, env.map(str::trim).filter(|s| !s.is_empty())) {
        (Some(level), _) => EnvFilter::default().add_directive(level_filter(level).into()),
        (None, Some(directives)) => EnvFilter::try_new(directives).unwrap_or_else(|err| {
            eprintln!("ignoring invalid {LOG_ENV}={directives:?}: {err}");
            EnvFilter::new("info")
        }),
        (None, None) => EnvFilter::new("info"),
    };

    QUIET_TARGETS.iter().fold(base, |filter, directive| match directive.parse() {
        Ok(d) => filter.add_directive(d),
        Err(_) => filter,
    })
}

fn level_filter(lvl: LogLevel) -> LevelFilter {
    match lvl {
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    }
}

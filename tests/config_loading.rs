// tests/config_loading.rs

mod common;
use crate::common::{TestResult, init_tracing};

use std::time::Duration;

use parci::config::{ProjectConfig, load_and_validate, parse_str};
use parci::dag::{CommandSpec, TaskGraph};
use parci::errors::{ConfigError, GraphError};
use parci::params::ParamRef;
use parci::types::{BackendKind, FailurePolicy};

fn validate(toml: &str) -> Result<ProjectConfig, ConfigError> {
    ProjectConfig::try_from(parse_str(toml)?)
}

fn invalid_message(toml: &str) -> String {
    match validate(toml) {
        Err(ConfigError::Invalid(msg)) => msg,
        other => panic!("expected ConfigError::Invalid, got {other:?}"),
    }
}

const FULL: &str = r#"
[config]
concurrency = 2
on_failure = "isolate-branch"

[params]
backend = "file"
path = ".parci/params.json"
namespace = "ci"

[container]
max_cpus = 4
max_memory_mb = 2048

[[task]]
name = "build"
cmd = "make all"
container = { image = "rust:1.85", cpus = 2, memory_mb = 1024, mounts = [".:/src", "/cache:/cache:ro"], workdir = "/src", env = { CARGO_TERM_COLOR = "never" } }
outputs = ["artifact"]

[[task]]
name = "publish"
cmd = ["./publish.sh", "--verbose"]
depends_on = ["build"]
inputs = ["build.artifact", { ref = "registry_token", secret = true, env = "TOKEN" }]
retry = { max_attempts = 3, backoff_secs = 1.5 }
on_failure = "fail-fast"
"#;

#[test]
fn full_file_is_parsed_into_task_definitions() -> TestResult {
    init_tracing();
    let cfg = validate(FULL)?;

    assert_eq!(cfg.concurrency, 2);
    assert_eq!(cfg.on_failure, FailurePolicy::IsolateBranch);
    assert_eq!(cfg.params.backend, BackendKind::File);
    assert_eq!(cfg.params.namespace, "ci");
    assert!(cfg.params.read_only);
    assert_eq!(cfg.container.max_memory_mb, Some(2048));
    assert_eq!(cfg.container.binary, "docker");

    let build = &cfg.tasks[0];
    assert_eq!(build.name, "build");
    assert_eq!(build.command, CommandSpec::Shell("make all".into()));
    let spec = build.container.as_ref().ok_or("build has no container")?;
    assert_eq!(spec.image, "rust:1.85");
    assert_eq!(spec.resources.cpus, Some(2.0));
    assert_eq!(spec.mounts.len(), 2);
    assert!(spec.mounts[1].read_only);
    assert_eq!(spec.workdir.as_deref(), Some("/src"));
    assert_eq!(spec.env.get("CARGO_TERM_COLOR").map(String::as_str), Some("never"));

    let publish = &cfg.tasks[1];
    assert_eq!(
        publish.command,
        CommandSpec::Argv(vec!["./publish.sh".into(), "--verbose".into()])
    );
    assert_eq!(publish.depends_on, vec!["build".to_string()]);
    assert_eq!(publish.inputs.len(), 2);
    assert_eq!(publish.inputs[0].reference, ParamRef::task("build", "artifact"));
    assert!(!publish.inputs[0].secret);
    assert_eq!(publish.inputs[0].env_var(), "ARTIFACT");
    assert_eq!(publish.inputs[1].reference, ParamRef::run("registry_token"));
    assert!(publish.inputs[1].secret);
    assert_eq!(publish.inputs[1].env_var(), "TOKEN");
    assert_eq!(publish.retry.max_attempts, 3);
    assert_eq!(publish.retry.backoff, Duration::from_millis(1500));
    assert_eq!(publish.on_failure, Some(FailurePolicy::FailFast));

    // The declarations form a valid graph.
    TaskGraph::build(cfg.tasks)?;
    Ok(())
}

#[test]
fn defaults_apply_when_sections_are_missing() -> TestResult {
    let cfg = validate(
        r#"
[[task]]
name = "a"
cmd = "true"

[[task]]
name = "b"
cmd = "true"
after = ["a"]
"#,
    )?;
    assert_eq!(cfg.concurrency, 2);
    assert_eq!(cfg.on_failure, FailurePolicy::FailFast);
    assert_eq!(cfg.params.backend, BackendKind::Env);
    assert_eq!(cfg.params.prefix, "PARCI_PARAM_");
    assert_eq!(cfg.tasks[1].depends_on, vec!["a".to_string()]);
    assert_eq!(cfg.tasks[0].retry.max_attempts, 1);
    assert!(cfg.tasks[0].container.is_none());
    Ok(())
}

#[test]
fn default_concurrency_is_capped() -> TestResult {
    let mut toml = String::new();
    for i in 0..10 {
        toml.push_str(&format!("[[task]]\nname = \"t{i}\"\ncmd = \"true\"\n\n"));
    }
    assert_eq!(validate(&toml)?.concurrency, 4);
    Ok(())
}

#[test]
fn semantic_errors_are_reported() {
    let cases = [
        ("", "at least one"),
        (
            "[config]\nconcurrency = 0\n[[task]]\nname = \"a\"\ncmd = \"true\"",
            "concurrency",
        ),
        ("[[task]]\nname = \"a\"\ncmd = \"  \"", "empty `cmd`"),
        ("[[task]]\nname = \"a\"\ncmd = []", "empty `cmd` array"),
        (
            "[[task]]\nname = \"a\"\ncmd = \"true\"\noutputs = [\"x\", \"x\"]",
            "twice",
        ),
        (
            "[[task]]\nname = \"a\"\ncmd = \"true\"\nretry = { max_attempts = 0 }",
            "max_attempts",
        ),
        (
            "[[task]]\nname = \"a\"\ncmd = \"true\"\ncontainer = { image = \"x\", mounts = [\"nocolon\"] }",
            "invalid mount",
        ),
        (
            "[[task]]\nname = \"a\"\ncmd = \"true\"\ninputs = [{ ref = \"t\", env = \"1BAD\" }]",
            "environment variable",
        ),
        (
            "[params]\nbackend = \"file\"\n[[task]]\nname = \"a\"\ncmd = \"true\"",
            "path",
        ),
        (
            "[params]\nbackend = \"external-service\"\nurl = \"ftp://x\"\n[[task]]\nname = \"a\"\ncmd = \"true\"",
            "http",
        ),
    ];
    for (toml, needle) in cases {
        let msg = invalid_message(toml);
        assert!(msg.contains(needle), "'{msg}' should mention '{needle}'");
    }
}

#[test]
fn unknown_fields_and_bad_policies_are_toml_errors() {
    for toml in [
        "[[task]]\nname = \"a\"\ncmd = \"true\"\nbogus = 1",
        "[config]\non_failure = \"sometimes\"\n[[task]]\nname = \"a\"\ncmd = \"true\"",
        "[[task]]\nname = \"a\"",
    ] {
        assert!(
            matches!(validate(toml), Err(ConfigError::Toml(_))),
            "expected a TOML error for {toml:?}"
        );
    }
}

#[test]
fn graph_errors_surface_after_validation() -> TestResult {
    let cfg = validate(
        r#"
[[task]]
name = "a"
cmd = "true"
depends_on = ["b"]

[[task]]
name = "b"
cmd = "true"
depends_on = ["a"]
"#,
    )?;
    assert!(matches!(
        TaskGraph::build(cfg.tasks),
        Err(GraphError::CycleDetected { .. })
    ));
    Ok(())
}

#[test]
fn load_and_validate_reads_from_disk() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("Parci.toml");
    std::fs::write(&path, FULL)?;

    let cfg = load_and_validate(&path)?;
    assert_eq!(cfg.tasks.len(), 2);

    let missing = load_and_validate(dir.path().join("nope.toml"));
    assert!(matches!(missing, Err(ConfigError::Io { .. })));
    Ok(())
}

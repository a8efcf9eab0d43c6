// tests/host_adapter.rs
//
// End-to-end runs on the host runtime: real processes, real `/bin/sh`.
#![cfg(unix)]

mod common;
use crate::common::{TestResult, env_store, init_tracing, with_timeout};

use std::sync::Arc;
use std::time::{Duration, Instant};

use parci::config::ContainerSettings;
use parci::dag::{CommandSpec, RunStatus, TaskStatus};
use parci::engine::{Engine, EngineOptions};
use parci::errors::ContainerError;
use parci::exec::host::HostRuntime;
use parci::exec::{ContainerAdapter, ExecParams, SystemAdapter};
use parci::params::{ParamRef, Redactor, SecretValue};
use parci_test_utils::builders::{GraphBuilder, TaskDefBuilder};
use tokio_util::sync::CancellationToken;

fn system_adapter() -> Arc<SystemAdapter> {
    Arc::new(SystemAdapter::new(&ContainerSettings::default()))
}

#[tokio::test]
async fn outputs_flow_between_host_tasks() -> TestResult {
    init_tracing();
    let graph = GraphBuilder::new()
        .task(
            TaskDefBuilder::new("version")
                .cmd("echo building; echo '::set-output version=1.4.2'")
                .output("version"),
        )
        .task(
            TaskDefBuilder::new("check")
                .after("version")
                .input("version.version")
                .cmd("test \"$VERSION\" = 1.4.2"),
        )
        .build();

    let engine = Engine::new(env_store(&[]), system_adapter(), EngineOptions::new(2));
    let result = with_timeout(engine.run(graph, Vec::new(), CancellationToken::new())).await;

    assert_eq!(result.status, RunStatus::Succeeded, "{}", result.render_text());
    assert_eq!(
        result.task("version").unwrap().outputs.get("version").map(String::as_str),
        Some("1.4.2")
    );
    Ok(())
}

#[tokio::test]
async fn failing_body_reports_exit_code_and_redacted_stderr() -> TestResult {
    const SECRET: &str = "tok-8c1f0e";
    let graph = GraphBuilder::new()
        .task(
            TaskDefBuilder::new("deploy")
                .secret_input("token")
                .cmd("echo \"using $TOKEN\" >&2; exit 7"),
        )
        .build();

    let store = env_store(&[]);
    let token = store.bind(ParamRef::run("token"), SecretValue::from(SECRET), true);
    let engine = Engine::new(Arc::clone(&store), system_adapter(), EngineOptions::new(1));
    let result = with_timeout(engine.run(graph, vec![token], CancellationToken::new())).await;

    let deploy = result.task("deploy").unwrap();
    assert_eq!(deploy.status, TaskStatus::Failed);
    assert_eq!(deploy.exit_code, Some(7));
    assert_eq!(deploy.stderr_tail, "using ***");
    assert!(!result.snapshot()?.contains(SECRET));
    assert!(!result.render_text().contains(SECRET));
    assert_eq!(store.live_secrets(), 0);
    Ok(())
}

#[tokio::test]
async fn cancellation_kills_a_running_body() -> TestResult {
    let graph = GraphBuilder::new()
        .task(TaskDefBuilder::new("slow").cmd("sleep 30"))
        .task(TaskDefBuilder::new("after").after("slow"))
        .build();

    let engine = Engine::new(env_store(&[]), system_adapter(), EngineOptions::new(1));
    let cancel = CancellationToken::new();
    let trigger = {
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        }
    };

    let started = Instant::now();
    let (result, ()) =
        with_timeout(async { tokio::join!(engine.run(graph, Vec::new(), cancel.clone()), trigger) })
            .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(result.status, RunStatus::Canceled);
    assert_eq!(result.status_of("slow"), Some(TaskStatus::Canceled));
    assert_eq!(result.status_of("after"), Some(TaskStatus::Canceled));
    Ok(())
}

#[tokio::test]
async fn argv_commands_bypass_the_shell() -> TestResult {
    let runtime = HostRuntime::new(1024);
    let handle = runtime.acquire("t", 1);
    let result = runtime
        .execute(
            &handle,
            &CommandSpec::Argv(vec!["echo".into(), "$HOME".into()]),
            &ExecParams::default(),
        )
        .await?;
    assert!(result.success());
    assert_eq!(result.stdout.trim(), "$HOME");
    Ok(())
}

#[tokio::test]
async fn captured_output_is_bounded() -> TestResult {
    let runtime = HostRuntime::new(16);
    let handle = runtime.acquire("t", 1);
    let result = runtime
        .execute(
            &handle,
            &CommandSpec::Shell("head -c 100000 /dev/zero | tr '\\0' x".into()),
            &ExecParams::default(),
        )
        .await?;
    assert!(result.success());
    assert_eq!(result.stdout.len(), 16);
    Ok(())
}

#[tokio::test]
async fn truncated_output_never_shows_a_secret_prefix() -> TestResult {
    let runtime = HostRuntime::new(12);
    let handle = runtime.acquire("t", 1);
    let mut redactor = Redactor::new();
    redactor.add(&SecretValue::from("abcdefgh"));

    let result = runtime
        .execute(
            &handle,
            &CommandSpec::Shell("printf 'value: abcdefgh'".into()),
            &ExecParams {
                env: Vec::new(),
                redactor,
            },
        )
        .await?;
    // 12 bytes captured: "value: abcde"; the partial secret is dropped.
    assert_eq!(result.stdout, "value: ");
    Ok(())
}

#[tokio::test]
async fn missing_program_is_runtime_unavailable() {
    let adapter = system_adapter();
    let request = parci::exec::AcquireRequest {
        task: "t".into(),
        attempt: 1,
        container: None,
    };
    let handle = adapter.acquire(&request).await.unwrap();
    let err = adapter
        .execute(
            &handle,
            &CommandSpec::Argv(vec!["/nonexistent/parci-test-program".into()]),
            &ExecParams::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ContainerError::RuntimeUnavailable(_)));
    adapter.release(handle).await.unwrap();
}

#[tokio::test]
async fn secret_written_to_disk_is_redacted_in_a_later_task() -> TestResult {
    const SECRET: &str = "s3cr3t-value-42";
    let dir = tempfile::tempdir()?;
    let stash = dir.path().join("stash");

    let graph = GraphBuilder::new()
        .task(
            TaskDefBuilder::new("deploy")
                .secret_input("token")
                .cmd(&format!("printf '%s\\n' \"$TOKEN\" > '{}'", stash.display())),
        )
        .task(
            TaskDefBuilder::new("report")
                .after("deploy")
                .cmd(&format!("cat '{}' >&2; exit 1", stash.display())),
        )
        .build();

    let store = env_store(&[]);
    let token = store.bind(ParamRef::run("token"), SecretValue::from(SECRET), true);
    let engine = Engine::new(Arc::clone(&store), system_adapter(), EngineOptions::new(1));
    let result = with_timeout(engine.run(graph, vec![token], CancellationToken::new())).await;

    assert_eq!(std::fs::read_to_string(&stash)?.trim(), SECRET);
    let report = result.task("report").unwrap();
    assert_eq!(report.status, TaskStatus::Failed);
    assert_eq!(report.stderr_tail, "***");
    assert!(!result.snapshot()?.contains(SECRET));
    assert!(!result.render_text().contains(SECRET));
    Ok(())
}

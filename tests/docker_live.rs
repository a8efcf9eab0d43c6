// tests/docker_live.rs
//
// Needs a running Docker daemon and network access to pull `alpine:3.20`:
// `cargo test --test docker_live -- --ignored`

mod common;
use crate::common::{TestResult, env_store, init_tracing, within};

use std::sync::Arc;
use std::time::Duration;

use parci::config::ContainerSettings;
use parci::dag::{RunStatus, TaskStatus};
use parci::engine::{Engine, EngineOptions};
use parci::exec::SystemAdapter;
use parci::params::{ParamRef, SecretValue};
use parci_test_utils::builders::{GraphBuilder, TaskDefBuilder};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const IMAGE: &str = "alpine:3.20";

async fn containers_for(task: &str) -> Vec<String> {
    let output = Command::new("docker")
        .args([
            "container",
            "ls",
            "--all",
            "--quiet",
            "--filter",
            &format!("label=parci.task={task}"),
        ])
        .output()
        .await
        .expect("docker ls");
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

fn engine(store: Arc<parci::params::ParameterStore>) -> Engine {
    Engine::new(
        store,
        Arc::new(SystemAdapter::new(&ContainerSettings::default())),
        EngineOptions::new(2),
    )
}

#[tokio::test]
#[ignore]
async fn containerized_tasks_share_outputs_and_leave_nothing_behind() -> TestResult {
    init_tracing();
    let graph = GraphBuilder::new()
        .task(
            TaskDefBuilder::new("live_produce")
                .image(IMAGE)
                .cmd("echo '::set-output arch='$(uname -m)")
                .output("arch"),
        )
        .task(
            TaskDefBuilder::new("live_consume")
                .image(IMAGE)
                .after("live_produce")
                .input("live_produce.arch")
                .cmd("test -n \"$ARCH\""),
        )
        .build();

    let result = engine(env_store(&[]))
        .run(graph, Vec::new(), CancellationToken::new())
        .await;

    assert_eq!(result.status, RunStatus::Succeeded, "{}", result.render_text());
    assert!(result.warnings.is_empty());
    assert!(containers_for("live_produce").await.is_empty());
    assert!(containers_for("live_consume").await.is_empty());
    Ok(())
}

#[tokio::test]
#[ignore]
async fn secrets_reach_the_container_but_not_the_report() -> TestResult {
    const SECRET: &str = "live-secret-4f2a";
    let graph = GraphBuilder::new()
        .task(
            TaskDefBuilder::new("live_secret")
                .image(IMAGE)
                .secret_input("token")
                .cmd("echo \"$TOKEN\" >&2; test \"$TOKEN\" = live-secret-4f2a && exit 3"),
        )
        .build();

    let store = env_store(&[]);
    let token = store.bind(ParamRef::run("token"), SecretValue::from(SECRET), true);
    let result = engine(store).run(graph, vec![token], CancellationToken::new()).await;

    let report = result.task("live_secret").unwrap();
    assert_eq!(report.exit_code, Some(3));
    assert_eq!(report.stderr_tail, "***");
    assert!(!result.snapshot()?.contains(SECRET));
    Ok(())
}

#[tokio::test]
#[ignore]
async fn missing_image_fails_without_a_container() -> TestResult {
    let graph = GraphBuilder::new()
        .task(
            TaskDefBuilder::new("live_missing")
                .image("parci.invalid/does-not-exist:never")
                .cmd("true"),
        )
        .build();

    let result = engine(env_store(&[]))
        .run(graph, Vec::new(), CancellationToken::new())
        .await;

    assert_eq!(result.status_of("live_missing"), Some(TaskStatus::Failed));
    assert!(containers_for("live_missing").await.is_empty());
    Ok(())
}

#[tokio::test]
#[ignore]
async fn canceled_container_is_removed() -> TestResult {
    let graph = GraphBuilder::new()
        .task(TaskDefBuilder::new("live_cancel").image(IMAGE).cmd("sleep 300"))
        .build();

    let cancel = CancellationToken::new();
    let trigger = {
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            cancel.cancel();
        }
    };
    let engine = engine(env_store(&[]));
    let (result, ()) = within(Duration::from_secs(60), async {
        tokio::join!(engine.run(graph, Vec::new(), cancel.clone()), trigger)
    })
    .await;

    assert_eq!(result.status_of("live_cancel"), Some(TaskStatus::Canceled));
    assert!(containers_for("live_cancel").await.is_empty());
    Ok(())
}

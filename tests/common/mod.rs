#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;

use parci::dag::TaskGraph;
use parci::engine::{Engine, EngineOptions, RunResult};
use parci::params::{Parameter, ParameterStore};
use parci_test_utils::fake_adapter::FakeAdapter;
use tokio_util::sync::CancellationToken;

pub use parci_test_utils::{env_store, init_tracing, with_timeout, within};

pub type TestResult = Result<(), Box<dyn Error>>;

/// Run `graph` against a fake adapter to completion (5s timeout).
pub async fn run_fake(
    graph: TaskGraph,
    adapter: &FakeAdapter,
    store: Arc<ParameterStore>,
    options: EngineOptions,
    globals: Vec<Parameter>,
) -> RunResult {
    let engine = Engine::new(store, Arc::new(adapter.clone()), options);
    with_timeout(engine.run(graph, globals, CancellationToken::new())).await
}

pub mod builders;
pub mod fake_adapter;

use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;

use parci::params::{EnvBackend, ParameterStore, StoreOptions};
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test-writer subscriber once per test binary.
///
/// `RUST_LOG` overrides the default of `parci=debug,warn`. Output is only
/// shown for failing tests unless run with `--nocapture`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("parci=debug,warn"));

        // Another harness may already own the global subscriber.
        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Await `f`, panicking if it takes longer than `limit`.
pub async fn within<F, T>(limit: Duration, f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(limit, f).await {
        Ok(value) => value,
        Err(_) => panic!("test did not finish within {limit:?}"),
    }
}

/// [`within`] with the default five-second limit.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    within(TEST_TIMEOUT, f).await
}

/// Store backed by an env snapshot built from `vars` (prefix `PARCI_PARAM_`).
pub fn env_store(vars: &[(&str, &str)]) -> Arc<ParameterStore> {
    let backend = EnvBackend::from_vars(
        "PARCI_PARAM_",
        vars.iter().map(|(k, v)| (k.to_string(), v.to_string())),
    );
    Arc::new(ParameterStore::new(Arc::new(backend), StoreOptions::default()))
}

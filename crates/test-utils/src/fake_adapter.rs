use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

use parci::BoxFuture;
use parci::dag::CommandSpec;
use parci::errors::ContainerError;
use parci::exec::{
    AcquireRequest, ContainerAdapter, ContainerHandle, ExecParams, ExecutionResult, HandleKind,
    parse_outputs,
};

/// Scripted behaviour of one attempt.
#[derive(Debug, Clone)]
pub enum FakeBody {
    /// Exit 0 printing `stdout` (may contain `::set-output` lines).
    Succeed(String),
    /// Exit with this code.
    Exit(i32),
    /// Print `stdout`, `stderr`, then exit with `code`.
    Output {
        stdout: String,
        stderr: String,
        code: i32,
    },
    /// Print every injected environment value on stdout and stderr, exit 0.
    EchoEnv,
    /// Exit 0 after a delay.
    Sleep(Duration),
    /// Never finish on its own.
    Hang,
    /// `acquire` fails; nothing is created.
    FailAcquire(ContainerError),
    /// `release` fails after a successful run.
    FailRelease,
}

#[derive(Default)]
struct State {
    scripts: HashMap<String, VecDeque<FakeBody>>,
    bodies: HashMap<String, FakeBody>,
    acquire_calls: HashMap<String, usize>,
    acquired: HashMap<String, usize>,
    released: HashMap<String, usize>,
    live: HashSet<String>,
    max_live: usize,
    executing: usize,
    max_executing: usize,
    started: Vec<String>,
    envs: HashMap<String, BTreeMap<String, String>>,
    next_id: u64,
}

/// A fake `ContainerAdapter` that:
/// - runs per-task scripted bodies (default: succeed silently)
/// - counts acquire / release per task and tracks live handles
/// - records the environment every attempt received
/// - applies the attempt's redactor to its output, like the real adapter.
#[derive(Clone, Default)]
pub struct FakeAdapter {
    state: Arc<Mutex<State>>,
    started: Arc<Notify>,
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bodies for successive attempts of `task`. Once exhausted, attempts
    /// succeed silently.
    pub fn script(&self, task: &str, bodies: impl IntoIterator<Item = FakeBody>) -> &Self {
        self.lock()
            .scripts
            .entry(task.to_string())
            .or_default()
            .extend(bodies);
        self
    }

    pub fn acquire_calls(&self, task: &str) -> usize {
        self.lock().acquire_calls.get(task).copied().unwrap_or(0)
    }

    pub fn acquired(&self, task: &str) -> usize {
        self.lock().acquired.get(task).copied().unwrap_or(0)
    }

    pub fn released(&self, task: &str) -> usize {
        self.lock().released.get(task).copied().unwrap_or(0)
    }

    pub fn total_acquired(&self) -> usize {
        self.lock().acquired.values().sum()
    }

    pub fn total_released(&self) -> usize {
        self.lock().released.values().sum()
    }

    pub fn live_handles(&self) -> usize {
        self.lock().live.len()
    }

    /// Highest number of handles alive at once.
    pub fn max_live(&self) -> usize {
        self.lock().max_live
    }

    /// Highest number of bodies executing at once.
    pub fn max_executing(&self) -> usize {
        self.lock().max_executing
    }

    /// Task names in the order their bodies started.
    pub fn started(&self) -> Vec<String> {
        self.lock().started.clone()
    }

    /// Environment seen by the latest attempt of `task`.
    pub fn env_of(&self, task: &str) -> Option<BTreeMap<String, String>> {
        self.lock().envs.get(task).cloned()
    }

    /// Wait until at least `n` bodies have started.
    pub async fn wait_started(&self, n: usize) {
        loop {
            let notified = self.started.notified();
            if self.lock().started.len() >= n {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

impl ContainerAdapter for FakeAdapter {
    fn acquire<'a>(
        &'a self,
        request: &'a AcquireRequest,
    ) -> BoxFuture<'a, Result<ContainerHandle, ContainerError>> {
        Box::pin(async move {
            let mut state = self.lock();
            *state.acquire_calls.entry(request.task.clone()).or_default() += 1;

            let body = state
                .scripts
                .get_mut(&request.task)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| FakeBody::Succeed(String::new()));
            if let FakeBody::FailAcquire(e) = body {
                return Err(e);
            }

            state.next_id += 1;
            let id = format!("fake-{}-{}", request.task, state.next_id);
            *state.acquired.entry(request.task.clone()).or_default() += 1;
            state.live.insert(id.clone());
            state.max_live = state.max_live.max(state.live.len());
            state.bodies.insert(id.clone(), body);

            Ok(ContainerHandle {
                id: id.clone(),
                task: request.task.clone(),
                attempt: request.attempt,
                kind: HandleKind::Docker { name: id },
            })
        })
    }

    fn execute<'a>(
        &'a self,
        handle: &'a ContainerHandle,
        _command: &'a CommandSpec,
        params: &'a ExecParams,
    ) -> BoxFuture<'a, Result<ExecutionResult, ContainerError>> {
        Box::pin(async move {
            let env: BTreeMap<String, String> = params
                .env
                .iter()
                .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v.expose()).into_owned()))
                .collect();
            let body = {
                let mut state = self.lock();
                state.started.push(handle.task.clone());
                state.envs.insert(handle.task.clone(), env.clone());
                state.executing += 1;
                state.max_executing = state.max_executing.max(state.executing);
                state
                    .bodies
                    .get(&handle.id)
                    .cloned()
                    .unwrap_or_else(|| FakeBody::Succeed(String::new()))
            };
            self.started.notify_waiters();

            let _guard = ExecutingGuard(Arc::clone(&self.state));

            let (stdout, stderr, code) = match body {
                FakeBody::Succeed(out) => (out, String::new(), 0),
                FakeBody::Exit(code) => (String::new(), String::new(), code),
                FakeBody::Output {
                    stdout,
                    stderr,
                    code,
                } => (stdout, stderr, code),
                FakeBody::EchoEnv => {
                    let dump: String = env.iter().map(|(k, v)| format!("{k}={v}\n")).collect();
                    (dump.clone(), dump, 0)
                }
                FakeBody::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    (String::new(), String::new(), 0)
                }
                FakeBody::Hang => std::future::pending().await,
                FakeBody::FailAcquire(_) | FakeBody::FailRelease => {
                    (String::new(), String::new(), 0)
                }
            };

            let stdout = params.redactor.redact_to_string(stdout.as_bytes());
            let stderr = params.redactor.redact_to_string(stderr.as_bytes());
            Ok(ExecutionResult {
                exit_code: code,
                produced_outputs: parse_outputs(&stdout),
                stdout,
                stderr,
            })
        })
    }

    fn release(&self, handle: ContainerHandle) -> BoxFuture<'_, Result<(), ContainerError>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.live.remove(&handle.id);
            *state.released.entry(handle.task.clone()).or_default() += 1;
            match state.bodies.remove(&handle.id) {
                Some(FakeBody::FailRelease) => Err(ContainerError::TeardownFailed {
                    handle: handle.id,
                    reason: "scripted teardown failure".to_string(),
                }),
                _ => Ok(()),
            }
        })
    }
}

/// Decrements the executing counter even when the body is dropped midway.
struct ExecutingGuard(Arc<Mutex<State>>);

impl Drop for ExecutingGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.lock() {
            state.executing -= 1;
        }
    }
}

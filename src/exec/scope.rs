// src/exec/scope.rs

//! Scoped container acquisition.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::dag::CommandSpec;
use crate::errors::ContainerError;

use super::backend::{AcquireRequest, ContainerAdapter, ContainerHandle, ExecParams, ExecutionResult};

/// Owns a live handle and releases it exactly once.
///
/// The normal path is `close().await`. If the scope is dropped while still
/// holding its handle (the owning future was aborted), `Drop` hands the
/// release to the runtime in the background.
pub struct ContainerScope {
    adapter: Arc<dyn ContainerAdapter>,
    handle: Option<ContainerHandle>,
}

impl ContainerScope {
    pub async fn acquire(
        adapter: Arc<dyn ContainerAdapter>,
        request: &AcquireRequest,
    ) -> Result<Self, ContainerError> {
        let handle = adapter.acquire(request).await?;
        debug!(task = %request.task, attempt = request.attempt, handle = %handle, "container scope opened");
        Ok(Self {
            adapter,
            handle: Some(handle),
        })
    }

    /// The live handle. `None` only after `close`, which consumes the scope,
    /// so callers always observe `Some`.
    pub fn handle(&self) -> Option<&ContainerHandle> {
        self.handle.as_ref()
    }

    pub fn handle_id(&self) -> &str {
        self.handle.as_ref().map(|h| h.id.as_str()).unwrap_or("released")
    }

    /// Run a body in the scoped environment.
    pub async fn execute(
        &self,
        command: &CommandSpec,
        params: &ExecParams,
    ) -> Result<ExecutionResult, ContainerError> {
        match &self.handle {
            Some(handle) => self.adapter.execute(handle, command, params).await,
            None => Err(ContainerError::RuntimeUnavailable(
                "environment already released".to_string(),
            )),
        }
    }

    /// Release the handle and report the teardown result.
    pub async fn close(mut self) -> Result<(), ContainerError> {
        match self.handle.take() {
            Some(handle) => self.adapter.release(handle).await,
            None => Ok(()),
        }
    }
}

impl Drop for ContainerScope {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let id = handle.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                warn!(handle = %id, "container scope dropped without close; releasing in background");
                let adapter = Arc::clone(&self.adapter);
                rt.spawn(async move {
                    if let Err(e) = adapter.release(handle).await {
                        error!(handle = %id, error = %e, "background container release failed");
                    }
                });
            }
            Err(_) => {
                error!(handle = %id, "no async runtime to release container; it may leak");
            }
        }
    }
}

// src/params/backend.rs

//! Pluggable parameter backends.
//!
//! Every backend offers the same capability (get / put / delete by key
//! within a namespace) and differs only in where the bytes physically live.
//! The concrete backend is chosen once, when the Run starts, from the
//! `[params]` settings.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use zeroize::Zeroizing;

use crate::BoxFuture;
use crate::config::ParamsSettings;
use crate::errors::ParameterError;
use crate::fs::RealFileSystem;
use crate::params::env::EnvBackend;
use crate::params::file::FileBackend;
use crate::params::secret::SecretValue;
use crate::params::service::ServiceBackend;
use crate::types::BackendKind;

pub trait ParameterBackend: Send + Sync + Debug {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &'static str;

    fn get<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<SecretValue, ParameterError>>;

    fn put<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
        value: &'a SecretValue,
    ) -> BoxFuture<'a, Result<(), ParameterError>>;

    fn delete<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<(), ParameterError>>;
}

/// Open the backend described by `settings`.
///
/// Credentials (file passphrase, service token) are read from the
/// environment variables the settings name, here and only here.
pub fn open_backend(settings: &ParamsSettings) -> Result<Arc<dyn ParameterBackend>, ParameterError> {
    info!(backend = %settings.backend, namespace = %settings.namespace, "opening parameter backend");

    match settings.backend {
        BackendKind::Env => Ok(Arc::new(EnvBackend::from_process(&settings.prefix))),
        BackendKind::File => {
            let path = settings.path.clone().ok_or_else(|| unavailable("file", "params.path is not set"))?;
            let passphrase = credential(&settings.passphrase_env)?.ok_or_else(|| {
                ParameterError::AccessDenied {
                    name: settings.passphrase_env.clone(),
                    reason: "passphrase environment variable is not set".to_string(),
                }
            })?;
            let backend = FileBackend::open(path, passphrase.as_bytes(), Arc::new(RealFileSystem))?;
            Ok(Arc::new(backend))
        }
        BackendKind::ExternalService => {
            let url = settings
                .url
                .clone()
                .ok_or_else(|| unavailable("external-service", "params.url is not set"))?;
            let token = match &settings.token_env {
                Some(var) => credential(var)?,
                None => None,
            };
            let backend = ServiceBackend::new(
                &url,
                token,
                Duration::from_millis(settings.timeout_ms),
            )?;
            Ok(Arc::new(backend))
        }
    }
}

fn credential(var: &str) -> Result<Option<Zeroizing<String>>, ParameterError> {
    match std::env::var(var) {
        Ok(value) => Ok(Some(Zeroizing::new(value))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ParameterError::AccessDenied {
            name: var.to_string(),
            reason: "credential is not valid UTF-8".to_string(),
        }),
    }
}

pub(crate) fn unavailable(backend: &str, reason: impl Into<String>) -> ParameterError {
    ParameterError::BackendUnavailable {
        backend: backend.to_string(),
        reason: reason.into(),
    }
}

// src/params/store.rs

//! Run-scoped parameter store.
//!
//! The store owns the Run's secret vault: sensitive values bound during the
//! Run live only here, addressed by opaque handles from `Parameter`s. The
//! vault is emptied on `teardown` and when the store is dropped, and each
//! `SecretValue` zeroes its buffer on drop.
//!
//! Next to the vault the store keeps the Run's redaction set: every secret
//! bound or resolved during the Run. `forget` drops a secret from the vault
//! but not from the redaction set, so output captured from any later task
//! is still masked. The set is zeroed on `teardown`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::errors::ParameterError;
use crate::params::backend::ParameterBackend;
use crate::params::env::DEFAULT_NAMESPACE;
use crate::params::model::{ParamRef, Parameter, ValueRef};
use crate::params::secret::{Redactor, SecretValue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Backend namespace this Run reads from and promotes into.
    pub namespace: String,
    /// Reject every write to the backend.
    pub read_only: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            read_only: true,
        }
    }
}

#[derive(Debug)]
pub struct ParameterStore {
    backend: Arc<dyn ParameterBackend>,
    options: StoreOptions,
    vault: Mutex<HashMap<u64, SecretValue>>,
    redactions: Mutex<Redactor>,
    next_handle: AtomicU64,
}

impl ParameterStore {
    pub fn new(backend: Arc<dyn ParameterBackend>, options: StoreOptions) -> Self {
        Self {
            backend,
            options,
            vault: Mutex::new(HashMap::new()),
            redactions: Mutex::new(Redactor::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.options.namespace
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Bind a value into the Run namespace.
    ///
    /// Sensitive values go to the vault and the returned `Parameter` only
    /// carries a handle. Plain values are kept inline.
    pub fn bind(&self, reference: ParamRef, value: SecretValue, sensitive: bool) -> Parameter {
        if sensitive {
            let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
            self.register_secret(&value);
            self.vault().insert(handle, value);
            debug!(param = %reference, handle, "bound secret parameter");
            Parameter {
                reference,
                sensitive: true,
                value: ValueRef::Vault(handle),
            }
        } else {
            let text = String::from_utf8_lossy(value.expose()).into_owned();
            Parameter {
                reference,
                sensitive: false,
                value: ValueRef::Inline(text),
            }
        }
    }

    /// Reference to a value living in the backend, fetched on `resolve`.
    pub fn external(&self, reference: ParamRef, sensitive: bool) -> Parameter {
        Parameter::external(reference, sensitive)
    }

    /// Fetch the bytes behind `param`.
    pub async fn resolve(&self, param: &Parameter) -> Result<SecretValue, ParameterError> {
        match &param.value {
            ValueRef::Inline(value) => Ok(SecretValue::from(value.as_str())),
            ValueRef::Vault(handle) => {
                self.vault()
                    .get(handle)
                    .cloned()
                    .ok_or_else(|| ParameterError::NotFound {
                        name: param.reference.to_string(),
                    })
            }
            ValueRef::Backend { key } => {
                debug!(
                    param = %param.reference,
                    backend = self.backend.name(),
                    "resolving parameter from backend"
                );
                let value = self
                    .backend
                    .get(&self.options.namespace, key)
                    .await
                    .map_err(|e| match e {
                        ParameterError::NotFound { .. } => ParameterError::NotFound {
                            name: param.reference.to_string(),
                        },
                        other => other,
                    })?;
                if param.sensitive {
                    self.register_secret(&value);
                }
                Ok(value)
            }
        }
    }

    /// Write a bound value to the backend under its bare name, making it
    /// visible beyond this Run.
    pub async fn promote(&self, param: &Parameter) -> Result<(), ParameterError> {
        self.ensure_writable(&param.reference.name)?;
        let value = self.resolve(param).await?;
        self.backend
            .put(&self.options.namespace, &param.reference.name, &value)
            .await?;
        info!(param = %param.reference, "promoted parameter to backend");
        Ok(())
    }

    pub async fn store(&self, key: &str, value: &SecretValue) -> Result<(), ParameterError> {
        self.ensure_writable(key)?;
        self.backend.put(&self.options.namespace, key, value).await
    }

    pub async fn remove(&self, key: &str) -> Result<(), ParameterError> {
        self.ensure_writable(key)?;
        self.backend.delete(&self.options.namespace, key).await
    }

    /// Drop the in-memory copy of a secret. Returns whether anything was
    /// released. Plain and backend parameters hold nothing to release.
    pub fn forget(&self, param: &Parameter) -> bool {
        let ValueRef::Vault(handle) = &param.value else {
            return false;
        };
        let released = self.vault().remove(handle).is_some();
        if released {
            debug!(param = %param.reference, "forgot secret parameter");
        }
        released
    }

    /// Mask `value` in every output captured for the rest of the Run.
    pub fn register_secret(&self, value: &SecretValue) {
        self.redactions().add(value);
    }

    /// Redactor over every secret seen so far in this Run.
    pub fn redactor(&self) -> Redactor {
        self.redactions().clone()
    }

    /// Number of secrets still held in memory.
    pub fn live_secrets(&self) -> usize {
        self.vault().len()
    }

    /// Release every secret held by the Run.
    pub fn teardown(&self) {
        let mut vault = self.vault();
        if !vault.is_empty() {
            debug!(count = vault.len(), "releasing remaining secrets");
        }
        vault.clear();
        drop(vault);
        *self.redactions() = Redactor::new();
    }

    fn ensure_writable(&self, key: &str) -> Result<(), ParameterError> {
        if self.options.read_only {
            return Err(ParameterError::AccessDenied {
                name: key.to_string(),
                reason: "parameter store is read-only".to_string(),
            });
        }
        Ok(())
    }

    fn vault(&self) -> MutexGuard<'_, HashMap<u64, SecretValue>> {
        self.vault.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn redactions(&self) -> MutexGuard<'_, Redactor> {
        self.redactions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ParameterStore {
    fn drop(&mut self) {
        self.vault
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        *self
            .redactions
            .get_mut()
            .unwrap_or_else(|e| e.into_inner()) = Redactor::new();
    }
}

// src/params/env.rs

use std::collections::HashMap;

use zeroize::Zeroizing;

use crate::BoxFuture;
use crate::dag::task::env_var_name;
use crate::errors::ParameterError;
use crate::params::backend::ParameterBackend;
use crate::params::secret::SecretValue;

/// Namespace that maps to the bare prefix.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Backend reading from the process environment.
///
/// The environment is snapshotted when the backend is created, so values
/// are stable for the whole Run. Keys map to variables as
/// `{prefix}{KEY}` in the default namespace and `{prefix}{NAMESPACE}_{KEY}`
/// otherwise, upper-cased. The process environment is never written.
#[derive(Debug)]
pub struct EnvBackend {
    prefix: String,
    vars: HashMap<String, Zeroizing<String>>,
}

impl EnvBackend {
    /// Snapshot every variable that starts with `prefix`.
    pub fn from_process(prefix: &str) -> Self {
        Self::from_vars(prefix, std::env::vars())
    }

    pub fn from_vars<I, K, V>(prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), Zeroizing::new(v.into())))
            .filter(|(k, _)| k.starts_with(prefix))
            .collect();
        Self {
            prefix: prefix.to_string(),
            vars,
        }
    }

    /// Environment variable that holds `key` in `namespace`.
    pub fn variable_for(&self, namespace: &str, key: &str) -> String {
        if namespace == DEFAULT_NAMESPACE || namespace.is_empty() {
            format!("{}{}", self.prefix, env_var_name(key))
        } else {
            format!(
                "{}{}_{}",
                self.prefix,
                env_var_name(namespace),
                env_var_name(key)
            )
        }
    }

    fn read_only(key: &str) -> ParameterError {
        ParameterError::AccessDenied {
            name: key.to_string(),
            reason: "the environment backend is read-only".to_string(),
        }
    }
}

impl ParameterBackend for EnvBackend {
    fn name(&self) -> &'static str {
        "env"
    }

    fn get<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<SecretValue, ParameterError>> {
        Box::pin(async move {
            let var = self.variable_for(namespace, key);
            self.vars
                .get(&var)
                .map(|v| SecretValue::from(v.as_str()))
                .ok_or_else(|| ParameterError::NotFound {
                    name: key.to_string(),
                })
        })
    }

    fn put<'a>(
        &'a self,
        _namespace: &'a str,
        key: &'a str,
        _value: &'a SecretValue,
    ) -> BoxFuture<'a, Result<(), ParameterError>> {
        Box::pin(async move { Err(Self::read_only(key)) })
    }

    fn delete<'a>(
        &'a self,
        _namespace: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<(), ParameterError>> {
        Box::pin(async move { Err(Self::read_only(key)) })
    }
}

// src/params/model.rs

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::engine::TaskName;

/// Where a parameter is visible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamScope {
    /// Run-global: bound for the Run or supplied by the backend.
    Run,
    /// Produced by the named task, readable by its downstream tasks.
    Task(TaskName),
}

/// Name + scope of a parameter. Written `name` (Run) or `producer.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamRef {
    pub scope: ParamScope,
    pub name: String,
}

impl ParamRef {
    pub fn run(name: impl Into<String>) -> Self {
        Self {
            scope: ParamScope::Run,
            name: name.into(),
        }
    }

    pub fn task(producer: impl Into<TaskName>, name: impl Into<String>) -> Self {
        Self {
            scope: ParamScope::Task(producer.into()),
            name: name.into(),
        }
    }
}

impl FromStr for ParamRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('.') {
            Some((producer, name)) if !producer.is_empty() && !name.is_empty() => {
                if name.contains('.') {
                    return Err(format!("invalid parameter reference '{s}'"));
                }
                Ok(ParamRef::task(producer, name))
            }
            Some(_) => Err(format!("invalid parameter reference '{s}'")),
            None if s.is_empty() => Err("empty parameter reference".to_string()),
            None => Ok(ParamRef::run(s)),
        }
    }
}

impl fmt::Display for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            ParamScope::Run => f.write_str(&self.name),
            ParamScope::Task(producer) => write!(f, "{}.{}", producer, self.name),
        }
    }
}

impl Serialize for ParamRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Where a parameter's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueRef {
    /// Plain value held directly in the Run namespace.
    Inline(String),
    /// Opaque handle into the Run store's secret vault.
    Vault(u64),
    /// Fetched from the configured backend at the point of use.
    Backend { key: String },
}

/// A named, scoped value. Sensitive parameters never hold their value
/// inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub reference: ParamRef,
    pub sensitive: bool,
    pub value: ValueRef,
}

impl Parameter {
    /// Reference to a value that lives in the backend.
    pub fn external(reference: ParamRef, sensitive: bool) -> Self {
        let key = reference.name.clone();
        Self {
            reference,
            sensitive,
            value: ValueRef::Backend { key },
        }
    }

    /// Plain value produced by a task.
    pub fn output(producer: &str, name: &str, value: String) -> Self {
        Self {
            reference: ParamRef::task(producer, name),
            sensitive: false,
            value: ValueRef::Inline(value),
        }
    }

    /// Serializable view. Only plain inline values are included.
    pub fn snapshot(&self) -> ParameterSnapshot {
        let value = match (&self.value, self.sensitive) {
            (ValueRef::Inline(v), false) => Some(v.clone()),
            _ => None,
        };
        let source = match &self.value {
            ValueRef::Inline(_) => "inline",
            ValueRef::Vault(_) => "vault",
            ValueRef::Backend { .. } => "backend",
        };
        let scope = match &self.reference.scope {
            ParamScope::Run => "run".to_string(),
            ParamScope::Task(producer) => format!("task:{producer}"),
        };
        ParameterSnapshot {
            reference: self.reference.clone(),
            scope,
            sensitive: self.sensitive,
            source,
            value,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParameterSnapshot {
    #[serde(rename = "name")]
    pub reference: ParamRef,
    pub scope: String,
    pub sensitive: bool,
    pub source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ProjectConfig, RawConfigFile};
use crate::errors::ConfigError;

/// Read and deserialize a task-definition file without semantic checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_str(&contents)
}

pub fn parse_str(contents: &str) -> Result<RawConfigFile, ConfigError> {
    Ok(toml::from_str(contents)?)
}

/// Load a task-definition file and validate it into a [`ProjectConfig`].
///
/// This is the entry point for the rest of the application. Graph-level
/// checks happen later, in `TaskGraph::build`.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ProjectConfig, ConfigError> {
    let raw = load_from_path(&path)?;
    ProjectConfig::try_from(raw)
}

/// `Parci.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Parci.toml")
}

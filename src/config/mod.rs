// src/config/mod.rs

//! Task-definition file loading and validation.
//!
//! - `model.rs` is the TOML-backed data model.
//! - `loader.rs` reads a file from disk.
//! - `validate.rs` turns the raw model into task declarations and runner
//!   settings.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, parse_str};
pub use model::{ContainerSettings, ParamsSettings, ProjectConfig, RawConfigFile};

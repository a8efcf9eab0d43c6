// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`backend`] defines the `ContainerAdapter` contract and the production
//!   `SystemAdapter`.
//! - [`docker`] drives the Docker CLI for containerized tasks.
//! - [`host`] runs bodies directly on the host.
//! - [`process`] spawns child processes, captures and redacts their output.
//! - [`scope`] ties a handle's release to every exit path.

pub mod backend;
pub mod docker;
pub mod host;
pub mod process;
pub mod scope;

pub use backend::{
    AcquireRequest, ContainerAdapter, ContainerHandle, ExecParams, ExecutionResult, HandleKind,
    SystemAdapter,
};
pub use host::HiddenEnv;
pub use process::parse_outputs;
pub use scope::ContainerScope;

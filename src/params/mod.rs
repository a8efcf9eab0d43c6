// src/params/mod.rs

pub mod backend;
pub mod env;
pub mod file;
pub mod model;
pub mod secret;
pub mod service;
pub mod store;

pub use backend::{ParameterBackend, open_backend};
pub use env::EnvBackend;
pub use file::{FileBackend, KdfCost};
pub use model::{ParamRef, ParamScope, Parameter, ParameterSnapshot, ValueRef};
pub use secret::{Redactor, SecretValue, REDACTED};
pub use service::ServiceBackend;
pub use store::{ParameterStore, StoreOptions};

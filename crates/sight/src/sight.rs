//! Sight - service-composition runtime
//!
//! Ties the layers together:
//! - `Runtime`, the aggregate owning modules, factories, the object-service
//!   registry, the buffer manager and the workers
//! - `app`, the instruction stream that builds an application from objects,
//!   services and connections
//! - `services`, the always-linked core module
//! - `settings`, layered configuration of the binary

pub mod app;
mod error;
pub mod runtime;
pub mod services;
pub mod settings;

pub use app::{AppConfig, AppConfigManager, Endpoint, Instruction, LaunchFailure};
pub use error::{Error, Result};
pub use runtime::{Runtime, RuntimeBuilder};
pub use settings::Settings;

pub use sight_com as com;
pub use sight_data as data;
pub use sight_runtime as module;
pub use sight_service as service;

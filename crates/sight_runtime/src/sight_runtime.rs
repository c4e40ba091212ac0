//! Sight Runtime - modules and executable factories
//!
//! This crate provides:
//! - `ExecutableFactory`, a string-keyed constructor registry
//! - Module descriptors (`module.toml`) and their discovery on disk
//! - `ModuleRegistry`, which resolves requirements and starts/stops modules
//! - `Linkage`, the static registration pass a module uses to contribute
//!   its plugin entry point and executables

mod descriptor;
mod discovery;
mod error;
mod factory;
mod plugin;
mod registry;

pub use descriptor::*;
pub use discovery::*;
pub use error::*;
pub use factory::*;
pub use plugin::*;
pub use registry::*;

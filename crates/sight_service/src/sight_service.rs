//! Sight Service - service lifecycle and the object-service registry
//!
//! This crate provides:
//! - The `Service` trait implemented by every pluggable behavior
//! - `ServiceHandle`, which drives a service through
//!   configure / start / update / swap / stop
//! - `ObjectServiceRegistry`, the live (object, key) → services mapping
//! - `ServiceContext`, what a service sees from inside its hooks

mod context;
mod error;
mod handle;
mod keys;
mod registry;
mod service;
mod state;

pub use context::*;
pub use error::*;
pub use handle::*;
pub use keys::*;
pub use registry::*;
pub use service::*;
pub use state::*;

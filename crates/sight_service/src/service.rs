//! The Service trait
//!
//! A service is a unit of behavior bound to objects through declared keys.
//! Implementations only provide the lifecycle hooks; the state machine,
//! registry bookkeeping and signal wiring live in [`ServiceHandle`].
//!
//! [`ServiceHandle`]: crate::ServiceHandle

use std::sync::Arc;

use sight_com::{Signals, Slots};
use sight_data::{Object, SIGNAL_MODIFIED};

use crate::context::ServiceContext;
use crate::error::HookError;
use crate::keys::{KeyConnection, KeyDecl};

/// Lifecycle slot: start the service
pub const SLOT_START: &str = "start";
/// Lifecycle slot: stop the service
pub const SLOT_STOP: &str = "stop";
/// Lifecycle slot: update the service
pub const SLOT_UPDATE: &str = "update";
/// Lifecycle slot: swap the object bound to a key
pub const SLOT_SWAP_KEY: &str = "swap_key";

/// Emitted after a successful start
pub const SIGNAL_STARTED: &str = "started";
/// Emitted after a successful update
pub const SIGNAL_UPDATED: &str = "updated";
/// Emitted with the key after a successful swap
pub const SIGNAL_SWAPPED: &str = "swapped";
/// Emitted after a stop
pub const SIGNAL_STOPPED: &str = "stopped";

/// Behavior plugged into the service lifecycle.
///
/// Hooks run with the service locked: a hook must not drive a lifecycle
/// transition of its own service (such calls fail with `InvalidState`).
pub trait Service: Send + 'static {
    /// Keys this service uses
    fn keys(&self) -> Vec<KeyDecl> {
        Vec::new()
    }

    /// Object signals connected to this service's slots while it runs.
    ///
    /// Defaults to `modified` → `update` for every auto-connected key.
    fn auto_connections(&self) -> Vec<KeyConnection> {
        self.keys()
            .into_iter()
            .filter(|decl| decl.auto_connect)
            .map(|decl| KeyConnection::new(decl.key, SIGNAL_MODIFIED, SLOT_UPDATE))
            .collect()
    }

    /// Add service-specific signals. Called once when the handle is created.
    fn register_signals(&self, _signals: &Signals) {}

    /// Add service-specific slots. Called once when the handle is created.
    fn register_slots(&self, _slots: &Slots) {}

    /// Read the parameters. Bindings are not available yet.
    fn configuring(&mut self, _ctx: &ServiceContext) -> Result<(), HookError> {
        Ok(())
    }

    fn starting(&mut self, ctx: &ServiceContext) -> Result<(), HookError>;

    fn updating(&mut self, ctx: &ServiceContext) -> Result<(), HookError>;

    /// Called after `key` was rebound to another object
    fn swapping(&mut self, _ctx: &ServiceContext, _key: &str) -> Result<(), HookError> {
        Ok(())
    }

    fn stopping(&mut self, ctx: &ServiceContext) -> Result<(), HookError>;
}

/// Configuration handed to `configure`
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Free-form parameters, a JSON object or null
    pub params: serde_json::Value,
    /// Objects bound to declared keys
    pub bindings: Vec<(String, Arc<Object>)>,
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        if !self.params.is_object() {
            self.params = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.params.as_object_mut() {
            map.insert(key.into(), value.into());
        }
        self
    }

    /// Bind an object to a key
    pub fn bind(mut self, key: impl Into<String>, object: Arc<Object>) -> Self {
        self.bindings.push((key.into(), object));
        self
    }
}

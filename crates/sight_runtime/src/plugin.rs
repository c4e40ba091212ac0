//! Module entry points.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Error type returned by plugin hooks
pub type PluginError = Box<dyn std::error::Error + Send + Sync>;

/// What a plugin sees of its module when it starts
#[derive(Debug, Clone)]
pub struct ModuleContext {
    pub id: String,
    pub version: String,
    pub parameters: BTreeMap<String, String>,
    pub location: Option<PathBuf>,
}

impl ModuleContext {
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

/// Entry point of a module, started and stopped with it.
pub trait Plugin: Send + Sync {
    fn start(&mut self, context: &ModuleContext) -> Result<(), PluginError>;

    fn stop(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

//! Module descriptors
//!
//! Every module directory carries a `module.toml`:
//!
//! ```toml
//! id = "sight.io"
//! version = "0.3.0"
//! requirements = ["sight.core"]
//! plugin = "sight::io::Plugin"
//!
//! [parameters]
//! default_path = "/data"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DiscoveryError;

/// File name looked up in each module directory
pub const DESCRIPTOR_FILE: &str = "module.toml";

/// Read-only metadata of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Unique module identifier
    pub id: String,
    /// Version string
    pub version: String,
    /// Modules that must be started first, in declaration order
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Free-form configuration handed to the plugin
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Disabled modules are known but refuse to start
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Plugin factory key of the module entry point
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    /// Directory the descriptor was read from
    #[serde(skip)]
    pub location: Option<PathBuf>,
}

fn default_enabled() -> bool {
    true
}

/// Raw form used to report missing fields precisely
#[derive(Deserialize)]
struct RawDescriptor {
    id: Option<String>,
    version: Option<String>,
    #[serde(default)]
    requirements: Vec<String>,
    #[serde(default)]
    parameters: BTreeMap<String, String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    plugin: Option<String>,
}

impl ModuleDescriptor {
    /// Descriptor for a module that is linked in rather than discovered
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            requirements: Vec::new(),
            parameters: BTreeMap::new(),
            enabled: true,
            plugin: None,
            location: None,
        }
    }

    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.requirements.push(requirement.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_plugin(mut self, key: impl Into<String>) -> Self {
        self.plugin = Some(key.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Parse descriptor text. `path` is only used for error reporting and as
    /// the module location.
    pub fn parse(content: &str, path: &Path) -> Result<Self, DiscoveryError> {
        let raw: RawDescriptor = toml::from_str(content).map_err(|e| DiscoveryError::Malformed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let id = required(raw.id, "id", path)?;
        let version = required(raw.version, "version", path)?;

        Ok(Self {
            id,
            version,
            requirements: raw.requirements,
            parameters: raw.parameters,
            enabled: raw.enabled,
            plugin: raw.plugin,
            location: path.parent().map(Path::to_path_buf),
        })
    }
}

fn required(value: Option<String>, field: &'static str, path: &Path) -> Result<String, DiscoveryError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(DiscoveryError::MissingField {
            path: path.to_path_buf(),
            field,
        }),
    }
}

//! Error types for the module runtime.

use std::path::PathBuf;

/// Errors raised by executable factories.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FactoryError {
    #[error("Factory key already registered: {0}")]
    DuplicateKey(String),

    #[error("Unknown factory key: {0}")]
    UnknownKey(String),
}

/// A module descriptor could not be used.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed module descriptor {}: {message}", path.display())]
    Malformed { path: PathBuf, message: String },

    #[error("Module descriptor {} is missing `{field}`", path.display())]
    MissingField { path: PathBuf, field: &'static str },
}

/// Errors raised while resolving, starting or stopping modules.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("Cyclic module dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Unknown module '{module}'{}", required_by_suffix(.required_by))]
    UnknownModule {
        module: String,
        required_by: Option<String>,
    },

    #[error("Module '{0}' is disabled")]
    Disabled(String),

    #[error("Module '{module}' could not register its executables: {source}")]
    Registration {
        module: String,
        #[source]
        source: FactoryError,
    },

    #[error("Module '{module}' has no usable plugin: {source}")]
    PluginFactory {
        module: String,
        #[source]
        source: FactoryError,
    },

    #[error("Module '{module}' failed to start: {message}")]
    Start { module: String, message: String },

    #[error("Module '{module}' was not started because '{requirement}' failed")]
    RequirementFailed { module: String, requirement: String },
}

fn required_by_suffix(required_by: &Option<String>) -> String {
    match required_by {
        Some(parent) => format!(" (required by '{parent}')"),
        None => String::new(),
    }
}

/// Result type for factory operations
pub type FactoryResult<T> = Result<T, FactoryError>;

/// Result type for module operations
pub type ModuleResult<T> = Result<T, ModuleError>;

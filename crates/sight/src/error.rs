//! Error type of the runtime aggregate.

use std::path::PathBuf;

use sight_com::ComError;
use sight_data::DataError;
use sight_runtime::{DiscoveryError, FactoryError, ModuleError};
use sight_service::{RegistryError, ServiceError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Factory(#[from] FactoryError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Com(#[from] ComError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("Invalid settings: {0}")]
    Settings(#[from] Box<figment::Error>),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed app config: {0}")]
    AppConfig(String),

    #[error("Id '{0}' is used twice in the app config")]
    DuplicateId(String),

    #[error("Object '{0}' already exists")]
    ObjectExists(String),

    #[error("Unknown object '{0}'")]
    UnknownObject(String),

    #[error("Unknown service '{0}'")]
    UnknownService(String),

    #[error("No object or service named '{0}'")]
    UnknownEndpoint(String),

    #[error("App '{0}' is already running")]
    AppRunning(String),
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Error::Settings(Box::new(e))
    }
}

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

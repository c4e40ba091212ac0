//! Error types for services and the object-service registry.

use sight_com::ComError;
use sight_data::DataError;

use crate::state::ServiceState;

/// Errors raised by the object-service registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Key '{key}' of object {object} is already written by service {holder}")]
    KeyAlreadyBound {
        object: String,
        key: String,
        holder: String,
    },

    #[error("A different object is already registered as {object}")]
    IdentifierConflict { object: String },
}

/// Errors raised by service lifecycle transitions.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Service {service} cannot {operation} while {state}")]
    InvalidState {
        service: String,
        state: ServiceState,
        operation: &'static str,
    },

    #[error("Service {service} configuration error: {message}")]
    Configuration { service: String, message: String },

    #[error("Service {service} is missing mandatory key '{key}'")]
    MissingKey { service: String, key: String },

    #[error("Service {service} does not declare key '{key}'")]
    UnknownKey { service: String, key: String },

    #[error("Key '{key}' of service {service} is not an output")]
    NotAnOutput { service: String, key: String },

    #[error("Service {service} no longer exists")]
    Gone { service: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Service {service} failed to start: {message}")]
    Start { service: String, message: String },

    #[error("Service {service} failed to update: {message}")]
    Update { service: String, message: String },

    #[error("Service {service} failed to swap '{key}': {message}")]
    Swap {
        service: String,
        key: String,
        message: String,
    },

    #[error(transparent)]
    Com(#[from] ComError),

    #[error(transparent)]
    Data(#[from] DataError),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Error type returned by service hooks
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

//! Error types for the communication layer.

/// Errors raised while wiring or dispatching signals and slots.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComError {
    #[error("Signature mismatch: signal carries `{signal}` but slot expects `{slot}`")]
    SignatureMismatch {
        signal: &'static str,
        slot: &'static str,
    },

    #[error("Signal not found: {0}")]
    SignalNotFound(String),

    #[error("Slot not found: {0}")]
    SlotNotFound(String),

    #[error("Worker '{0}' has stopped")]
    WorkerStopped(String),

    #[error("Failed to spawn worker thread: {0}")]
    SpawnFailed(String),
}

/// Result type for communication operations
pub type ComResult<T> = Result<T, ComError>;

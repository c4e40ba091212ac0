//! Error types for the data layer.

use crate::memory::MemoryError;

/// Errors raised by objects and data kinds.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Type mismatch: expected `{expected}`, found `{found}`")]
    TypeMismatch { expected: String, found: String },

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),
}

/// Result type for data operations
pub type DataResult<T> = Result<T, DataError>;

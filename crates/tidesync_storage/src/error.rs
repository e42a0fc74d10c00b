//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A record lacks one of its model's primary-key fields.
    #[error("record of model {model} is missing primary key field `{field}`")]
    MissingKey {
        /// The model the record belongs to.
        model: String,
        /// The absent key field.
        field: String,
    },

    /// A conditional save was rejected because the stored record did not match.
    #[error("conditional save rejected for model {model}, key {key}")]
    ConditionFailed {
        /// The model being written.
        model: String,
        /// Primary key of the rejected record.
        key: String,
    },

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage engine failed.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

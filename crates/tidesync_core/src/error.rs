//! Error types for the sync core.

use thiserror::Error;
use tidesync_storage::StorageError;

/// Result type for sync core operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in outbox and merger operations.
///
/// Storage failures are propagated unchanged; this layer does not retry.
/// Absence (empty queue, no local record, no version row) is never an error.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The storage collaborator rejected an operation.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A mutation's condition is not a JSON object.
    #[error("malformed mutation condition: {0}")]
    MalformedCondition(#[source] serde_json::Error),

    /// A mutation's data is not a JSON object.
    #[error("malformed payload in mutation for model id {model_id}: {source}")]
    MalformedPayload {
        /// The affected model id.
        model_id: String,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// A stored row could not be read back as an outbox entity.
    #[error("corrupt {table} row: {source}")]
    CorruptRow {
        /// Table the row came from.
        table: String,
        /// Decode failure.
        #[source]
        source: serde_json::Error,
    },

    /// A record has no value for one of its primary-key fields.
    #[error("record of model {model} has no value for key field `{field}`")]
    MissingIdentifier {
        /// Model name.
        model: String,
        /// Key field without a value.
        field: String,
    },
}

impl SyncError {
    /// Returns true if the failure originated in the storage collaborator.
    pub fn is_storage(&self) -> bool {
        matches!(self, SyncError::Storage(_))
    }
}

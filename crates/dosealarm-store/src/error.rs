//! Error types for record store operations.

use dosealarm_protocol::RecordId;

/// Errors returned by record stores and document decoding.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Document written by a newer version.
    #[error("unsupported schema version: {0}")]
    UnsupportedSchema(u32),
    /// Document shape is not a record list.
    #[error("invalid record document: {0}")]
    InvalidDocument(String),
    /// Record id is unknown to the store.
    #[error("record not found: {0}")]
    NotFound(RecordId),
    /// Record failed validation.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    /// Backend refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

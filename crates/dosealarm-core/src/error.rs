//! Error types for the alarm core.

use dosealarm_protocol::RecordId;
use dosealarm_store::StoreError;
use thiserror::Error;

/// Errors returned by scheduler, service and runtime operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Record store failure; scheduler state was left untouched.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Record id is unknown to the store.
    #[error("unknown record: {0}")]
    UnknownRecord(RecordId),
    /// Postpone request cannot be honored.
    #[error("invalid postpone: {0}")]
    InvalidPostpone(String),
    /// The alarm runtime task is no longer running.
    #[error("alarm runtime stopped")]
    Stopped,
}

impl CoreError {
    /// Map store errors, turning a missing record into [`CoreError::UnknownRecord`].
    pub(crate) fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => CoreError::UnknownRecord(id),
            other => CoreError::Store(other),
        }
    }
}

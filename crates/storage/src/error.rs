use fleetpulse_notify::StoreError;
use fleetpulse_presence::{DirectoryError, IngestError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection lock poisoned: {0}")]
    Lock(String),

    /// The call never touched the database
    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),

    /// The call was interrupted mid-flight and did not report back in time
    #[error("storage call timed out after {0:?}; outcome unknown")]
    OutcomeUnknown(Duration),

    #[error("storage task failed: {0}")]
    Task(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("already exists: {0}")]
    Conflict(String),
}

impl StorageError {
    pub(crate) fn corrupt(what: impl std::fmt::Display) -> Self {
        Self::Corrupt(what.to_string())
    }
}

impl From<StorageError> for DirectoryError {
    fn from(err: StorageError) -> Self {
        DirectoryError::Unavailable(err.to_string())
    }
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Corrupt(reason) => StoreError::Corrupt(reason),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

impl From<StorageError> for IngestError {
    fn from(err: StorageError) -> Self {
        IngestError::Sink(err.to_string())
    }
}

use crate::models::TaskId;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Remote store returned {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// How the engine reacts to a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retried through the mutation queue.
    Transient,
    /// Dropped without retry; the optimistic local state is kept.
    Permanent,
    /// Logged and swallowed; the engine keeps running in memory.
    Storage,
}

impl SyncError {
    pub fn class(&self) -> FailureClass {
        match self {
            SyncError::NetworkError(_) | SyncError::MalformedResponse(_) => FailureClass::Transient,
            SyncError::RemoteStatus { status, .. } if (400..500).contains(status) => {
                FailureClass::Permanent
            }
            SyncError::RemoteStatus { .. } => FailureClass::Transient,
            SyncError::StorageError(_) | SyncError::SerializationError(_) => FailureClass::Storage,
            SyncError::TaskNotFound(_) | SyncError::InvalidOperation(_) => FailureClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    pub fn is_permanent(&self) -> bool {
        self.class() == FailureClass::Permanent
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationError(err.to_string())
    }
}

impl From<uuid::Error> for SyncError {
    fn from(err: uuid::Error) -> Self {
        SyncError::SerializationError(err.to_string())
    }
}

//! Storage error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("invalid blob key: {0}")]
    InvalidKey(String),

    #[error("invalid archive: {0}")]
    Archive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for launchpad_core::Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => launchpad_core::Error::NotFound(format!("blob {}", key)),
            other => launchpad_core::Error::Storage(other.to_string()),
        }
    }
}

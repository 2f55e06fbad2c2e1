//! Database error types.

use launchpad_core::build::BuildStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: BuildStatus, to: BuildStatus },

    #[error("invalid stored data: {0}")]
    InvalidData(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::InvalidData(err.to_string())
    }
}

impl From<DbError> for launchpad_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => launchpad_core::Error::NotFound(what),
            DbError::Duplicate(what) | DbError::Conflict(what) => {
                launchpad_core::Error::Conflict(what)
            }
            DbError::InvalidTransition { from, to } => {
                launchpad_core::Error::InvalidTransition { from, to }
            }
            other => launchpad_core::Error::Internal(other.to_string()),
        }
    }
}

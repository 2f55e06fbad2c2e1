//! Error types for Launchpad.

use thiserror::Error;

use crate::build::BuildStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("app {0} has no linked source repository")]
    NoLinkedRepository(String),

    #[error("source repository is not accessible: {0}")]
    NoAccessibleRepo(String),

    #[error("app {0} has no build configuration")]
    MissingBuildConfig(String),

    #[error("unsupported archive: {0}")]
    UnsupportedArchive(String),

    #[error("missing content hash")]
    MissingHash,

    #[error("invalid content hash: {0}")]
    InvalidHash(String),

    #[error("hash mismatch: claimed {claimed}, stored bytes hash to {actual}")]
    HashMismatch { claimed: String, actual: String },

    #[error("invalid build status transition: {from} -> {to}")]
    InvalidTransition { from: BuildStatus, to: BuildStatus },

    #[error("extraction failed for deployment {deployment_id}: {message}")]
    ExtractionFailed {
        deployment_id: String,
        message: String,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

//! API error handling.

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use launchpad_core::Error;
use serde_json::json;
use tracing::error;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    UnsupportedMediaType(String),
    Unprocessable(String),
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::UnsupportedMediaType(msg) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::NotFound(_) => ApiError::NotFound(message),
            Error::InvalidInput(_) | Error::MissingHash | Error::InvalidHash(_) => {
                ApiError::BadRequest(message)
            }
            Error::Unauthorized(_) => ApiError::Unauthorized(message),
            Error::Conflict(_) | Error::InvalidTransition { .. } => ApiError::Conflict(message),
            Error::UnsupportedArchive(_) => ApiError::UnsupportedMediaType(message),
            Error::NoLinkedRepository(_)
            | Error::NoAccessibleRepo(_)
            | Error::MissingBuildConfig(_)
            | Error::HashMismatch { .. } => ApiError::Unprocessable(message),
            Error::Queue(_) => ApiError::BadGateway(message),
            Error::ExtractionFailed { .. } | Error::Storage(_) | Error::Internal(_) => {
                ApiError::Internal(message)
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(format!("invalid multipart body: {}", err))
    }
}

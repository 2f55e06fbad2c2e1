//! Machine-to-machine authentication for the build worker.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use constant_time_eq::constant_time_eq;

use crate::AppState;
use crate::error::ApiError;

/// Proof that the request carried the worker's bearer token.
///
/// This is separate from end-user authentication; only worker callbacks
/// accept it.
#[derive(Debug, Clone, Copy)]
pub struct WorkerAuth;

impl FromRequestParts<AppState> for WorkerAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::Unauthorized("missing worker token".to_string()))?;

        if !constant_time_eq(token.as_bytes(), state.config.worker.token.as_bytes()) {
            return Err(ApiError::Unauthorized("invalid worker token".to_string()));
        }
        Ok(WorkerAuth)
    }
}

//! Worker-facing endpoints: artifact upload, status callbacks and log
//! batches.
//!
//! Uploads are authorized by the per-build token embedded in the signed
//! upload URL; the callbacks take the worker's bearer token.

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use launchpad_core::artifact::Artifact;
use launchpad_core::build::{BuildJob, BuildStatus, Transition};
use launchpad_core::logs::{LogEntry, LogOrigin, LogStream};
use launchpad_core::{AppId, BuildId};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::AppState;
use crate::auth::WorkerAuth;
use crate::error::ApiError;

/// Largest bundle accepted in one upload.
const MAX_BUNDLE_BYTES: usize = 1024 * 1024 * 1024;

const HASH_FIELD: &str = "sha256";
const FILE_FIELD: &str = "file";

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/builds/{build_id}/artifacts",
            post(upload_artifact).layer(DefaultBodyLimit::max(MAX_BUNDLE_BYTES)),
        )
        .route("/builds/{build_id}/status", post(update_status))
        .route("/builds/{build_id}/logs", post(append_logs))
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    app_id: Uuid,
    token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    artifact_id: String,
    size_bytes: u64,
    content_hash: String,
}

impl From<Artifact> for UploadResponse {
    fn from(artifact: Artifact) -> Self {
        Self {
            artifact_id: artifact.id.to_string(),
            size_bytes: artifact.size_bytes,
            content_hash: artifact.content_hash.to_string(),
        }
    }
}

/// Accept a build's bundle.
///
/// The multipart body carries a `sha256` text field followed by exactly one
/// `file` field; the hash must come first so the file can be streamed
/// straight into storage.
async fn upload_artifact(
    State(state): State<AppState>,
    Path(build_id): Path<Uuid>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let build_id = BuildId::from_uuid(build_id);
    let app_id = AppId::from_uuid(query.app_id);
    if !state.signer.verify(build_id, &query.token) {
        return Err(ApiError::Unauthorized("invalid upload token".to_string()));
    }

    let mut claimed_hash: Option<String> = None;
    let mut artifact: Option<Artifact> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some(HASH_FIELD) => claimed_hash = Some(field.text().await?),
            Some(FILE_FIELD) => {
                if artifact.is_some() {
                    return Err(ApiError::BadRequest(
                        "exactly one archive file may be uploaded".to_string(),
                    ));
                }
                let file_name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .ok_or_else(|| ApiError::BadRequest("file field has no file name".to_string()))?;
                let data = field.map(|chunk| chunk.map_err(std::io::Error::other)).boxed();
                let ingested = state
                    .artifacts
                    .ingest(
                        app_id,
                        build_id,
                        &file_name,
                        data,
                        claimed_hash.as_deref().unwrap_or_default(),
                    )
                    .await?;
                artifact = Some(ingested);
            }
            _ => {}
        }
    }

    let artifact =
        artifact.ok_or_else(|| ApiError::BadRequest("missing archive file".to_string()))?;
    info!(
        build_id = %build_id,
        artifact_id = %artifact.id,
        "Accepted artifact upload"
    );
    Ok((StatusCode::CREATED, Json(artifact.into())))
}

#[derive(Debug, Deserialize)]
struct StatusCallback {
    status: BuildStatus,
}

#[derive(Debug, Serialize)]
struct StatusCallbackResponse {
    changed: bool,
    build: BuildJob,
}

async fn update_status(
    _auth: WorkerAuth,
    State(state): State<AppState>,
    Path(build_id): Path<Uuid>,
    Json(callback): Json<StatusCallback>,
) -> Result<Json<StatusCallbackResponse>, ApiError> {
    let transition = state
        .dispatcher
        .update_status(BuildId::from_uuid(build_id), callback.status)
        .await?;
    let changed = matches!(transition, Transition::Applied(_));
    Ok(Json(StatusCallbackResponse {
        changed,
        build: transition.into_job(),
    }))
}

#[derive(Debug, Deserialize)]
struct WorkerLogEntry {
    id: String,
    timestamp: Option<DateTime<Utc>>,
    stream: LogStream,
    content: String,
}

#[derive(Debug, Deserialize)]
struct LogBatch {
    entries: Vec<WorkerLogEntry>,
}

async fn append_logs(
    _auth: WorkerAuth,
    State(state): State<AppState>,
    Path(build_id): Path<Uuid>,
    Json(batch): Json<LogBatch>,
) -> Result<StatusCode, ApiError> {
    let build_id = BuildId::from_uuid(build_id);
    state.dispatcher.get_build(build_id).await?;

    let entries = batch
        .entries
        .into_iter()
        .map(|e| LogEntry {
            id: e.id,
            build_id,
            timestamp: e.timestamp,
            stream: e.stream,
            content: e.content,
            origin: LogOrigin::Live,
        })
        .collect();
    state.logs.ingest(entries).await;
    Ok(StatusCode::ACCEPTED)
}

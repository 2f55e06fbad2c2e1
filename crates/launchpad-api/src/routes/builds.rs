//! Build request and lookup endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use launchpad_core::build::{BuildJob, BuildOptions};
use launchpad_core::{AppId, BuildId};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_LIST_LIMIT: i64 = 20;
const MAX_LIST_LIMIT: i64 = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/apps/{app_id}/builds", post(request_build).get(list_builds))
        .route("/builds/{build_id}", get(get_build))
}

#[derive(Debug, Default, Deserialize)]
struct CreateBuildRequest {
    #[serde(default)]
    name: Option<String>,
}

async fn request_build(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
    Json(req): Json<CreateBuildRequest>,
) -> Result<(StatusCode, Json<BuildJob>), ApiError> {
    let job = state
        .dispatcher
        .request_build(AppId::from_uuid(app_id), BuildOptions { name: req.name })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

#[derive(Debug, Deserialize)]
struct ListBuildsQuery {
    limit: Option<i64>,
}

async fn list_builds(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
    Query(query): Query<ListBuildsQuery>,
) -> Result<Json<Vec<BuildJob>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let jobs = state
        .dispatcher
        .list_builds(AppId::from_uuid(app_id), limit)
        .await?;
    Ok(Json(jobs))
}

async fn get_build(
    State(state): State<AppState>,
    Path(build_id): Path<Uuid>,
) -> Result<Json<BuildJob>, ApiError> {
    let job = state
        .dispatcher
        .get_build(BuildId::from_uuid(build_id))
        .await?;
    Ok(Json(job))
}

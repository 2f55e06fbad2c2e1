//! Deployment endpoints: SPA deploys, API snapshots, listing and rollback.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use launchpad_core::deployment::{ApiDeployment, DeploymentKind, DeploymentView};
use launchpad_core::{AppId, ArtifactId, BuildId, DeploymentId};
use launchpad_pipeline::SpaSource;
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/apps/{app_id}/deployments", get(list_deployments))
        .route("/apps/{app_id}/deployments/spa", post(create_spa_deployment))
        .route("/apps/{app_id}/deployments/api", post(publish_api_snapshot))
        .route(
            "/apps/{app_id}/deployments/{deployment_id}",
            get(get_deployment),
        )
        .route(
            "/apps/{app_id}/deployments/{deployment_id}/activate",
            post(activate_deployment),
        )
        .route(
            "/apps/{app_id}/deployments/{deployment_id}/snapshot",
            get(get_snapshot),
        )
}

#[derive(Debug, Deserialize)]
struct ListDeploymentsQuery {
    kind: Option<DeploymentKind>,
}

async fn list_deployments(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
    Query(query): Query<ListDeploymentsQuery>,
) -> Result<Json<Vec<DeploymentView>>, ApiError> {
    let views = state
        .deployments
        .list(AppId::from_uuid(app_id), query.kind)
        .await?;
    Ok(Json(views))
}

/// Deploy either a build's bundle or, for a redeploy, an existing artifact.
#[derive(Debug, Deserialize)]
struct CreateSpaDeploymentRequest {
    build_id: Option<Uuid>,
    artifact_id: Option<Uuid>,
}

async fn create_spa_deployment(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
    Json(req): Json<CreateSpaDeploymentRequest>,
) -> Result<(StatusCode, Json<DeploymentView>), ApiError> {
    let source = match (req.build_id, req.artifact_id) {
        (Some(build_id), None) => SpaSource::Build(BuildId::from_uuid(build_id)),
        (None, Some(artifact_id)) => SpaSource::Artifact(ArtifactId::from_uuid(artifact_id)),
        _ => {
            return Err(ApiError::BadRequest(
                "exactly one of build_id or artifact_id is required".to_string(),
            ));
        }
    };

    let app_id = AppId::from_uuid(app_id);
    let deployment = state
        .deployments
        .create_spa_deployment(app_id, source)
        .await?;
    let view = state.deployments.get(app_id, deployment.id).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn publish_api_snapshot(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
) -> Result<(StatusCode, Json<DeploymentView>), ApiError> {
    let app_id = AppId::from_uuid(app_id);
    let deployment = state.deployments.publish_api_snapshot(app_id).await?;
    let view = state.deployments.get(app_id, deployment.id).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_deployment(
    State(state): State<AppState>,
    Path((app_id, deployment_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DeploymentView>, ApiError> {
    let view = state
        .deployments
        .get(
            AppId::from_uuid(app_id),
            DeploymentId::from_uuid(deployment_id),
        )
        .await?;
    Ok(Json(view))
}

async fn activate_deployment(
    State(state): State<AppState>,
    Path((app_id, deployment_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DeploymentView>, ApiError> {
    let app_id = AppId::from_uuid(app_id);
    let deployment_id = DeploymentId::from_uuid(deployment_id);
    let current = state.deployments.get(app_id, deployment_id).await?;
    let view = state
        .deployments
        .rollback(app_id, current.kind, deployment_id)
        .await?;
    Ok(Json(view))
}

async fn get_snapshot(
    State(state): State<AppState>,
    Path((app_id, deployment_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiDeployment>, ApiError> {
    let deployment = state
        .deployments
        .api_snapshot(
            AppId::from_uuid(app_id),
            DeploymentId::from_uuid(deployment_id),
        )
        .await?;
    Ok(Json(deployment))
}

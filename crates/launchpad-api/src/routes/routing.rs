//! Live route editing. Edits only reach traffic once an API snapshot is
//! published.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use launchpad_core::route::{Route, RouteMatch, RouteTarget};
use launchpad_core::{AppId, RouteId};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/apps/{app_id}/routes", get(list_routes).post(save_route))
}

async fn list_routes(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
) -> Result<Json<Vec<Route>>, ApiError> {
    let routes = state
        .deployments
        .list_routes(AppId::from_uuid(app_id))
        .await?;
    Ok(Json(routes))
}

fn default_enabled() -> bool {
    true
}

/// Create a route, or replace it when `id` names an existing one.
#[derive(Debug, Deserialize)]
struct SaveRouteRequest {
    id: Option<Uuid>,
    #[serde(rename = "match")]
    matcher: RouteMatch,
    target: RouteTarget,
    #[serde(default)]
    priority: i32,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

async fn save_route(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
    Json(req): Json<SaveRouteRequest>,
) -> Result<Json<Route>, ApiError> {
    let route = Route {
        id: req.id.map(RouteId::from_uuid).unwrap_or_default(),
        app_id: AppId::from_uuid(app_id),
        matcher: req.matcher,
        target: req.target,
        priority: req.priority,
        enabled: req.enabled,
        updated_at: Utc::now(),
    };
    let saved = state.deployments.save_route(route).await?;
    Ok(Json(saved))
}

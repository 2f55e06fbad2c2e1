//! API routes.

pub mod builds;
pub mod deployments;
pub mod health;
pub mod internal;
pub mod routing;
pub mod stream;

use crate::AppState;
use axum::Router;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .nest("/internal", internal::router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .merge(builds::router())
        .merge(deployments::router())
        .merge(routing::router())
        .merge(stream::router())
}

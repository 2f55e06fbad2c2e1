//! Server-sent event streams for app status and build logs.
//!
//! Streams stay open until the client disconnects or the server shuts down.
//! Dropping the response body releases the underlying subscription.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::header::{self, HeaderName};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use launchpad_core::{AppId, BuildId};
use serde::Serialize;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/apps/{app_id}/status/stream", get(status_stream))
        .route("/builds/{build_id}/logs/stream", get(log_stream))
}

async fn status_stream(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let app_id = AppId::from_uuid(app_id);
    state.apps.get(app_id).await.map_err(launchpad_core::Error::from)?;

    debug!(app_id = %app_id, "Status stream opened");
    let events = state.status.subscribe(app_id, CancellationToken::new());
    Ok(sse_response(events))
}

async fn log_stream(
    State(state): State<AppState>,
    Path(build_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let build_id = BuildId::from_uuid(build_id);
    state.dispatcher.get_build(build_id).await?;

    debug!(build_id = %build_id, "Log stream opened");
    let frames = state.logs.stream(build_id, CancellationToken::new());
    Ok(sse_response(frames))
}

/// Frame every item as `data: <json>` with proxy buffering disabled.
fn sse_response<T, S>(items: S) -> impl IntoResponse
where
    T: Serialize,
    S: Stream<Item = T> + Send + 'static,
{
    let events = items.filter_map(|item| match Event::default().json_data(&item) {
        Ok(event) => Some(Ok::<Event, Infallible>(event)),
        Err(e) => {
            warn!(error = %e, "Failed to encode stream event");
            None
        }
    });

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Sse::new(events).keep_alive(default_keep_alive()),
    )
}

fn default_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("keep-alive")
}

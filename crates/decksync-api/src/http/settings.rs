//! Config read/write plus loop-video and shutdown controls.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use decksync_data::ConfigEntry;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::http::errors::ApiError;
use crate::state::ApiState;

/// `GET /`: service banner for anything probing the root.
pub(crate) async fn service_info() -> Response {
    Json(json!({
        "service": "decksync",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

/// `GET /api/config`: all settings as a flat map.
pub(crate) async fn get_config(State(state): State<Arc<ApiState>>) -> Response {
    Json(state.config.all()).into_response()
}

/// `POST /api/config`: persist one key/value pair and broadcast it.
pub(crate) async fn set_config(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<ConfigEntry>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Ok(Json(entry)) = body else {
        return Err(ApiError::bad_request("invalid json"));
    };
    state.engine.set_config(&entry.key, &entry.value).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoopVideoRequest {
    #[serde(default)]
    active: bool,
}

/// `POST /api/loop-video`: switch every player to or away from the loop
/// video in lockstep.
pub(crate) async fn loop_video(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<LoopVideoRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Ok(Json(request)) = body else {
        return Err(ApiError::bad_request("invalid json"));
    };
    state.engine.loop_video_transition(request.active);
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `POST /api/shutdown`: acknowledge, then begin graceful termination.
pub(crate) async fn shutdown(State(state): State<Arc<ApiState>>) -> Response {
    info!("shutdown requested over HTTP");
    let notify = Arc::clone(&state.shutdown);
    tokio::spawn(async move {
        // Give the response time to flush before tearing the server down.
        tokio::time::sleep(Duration::from_millis(500)).await;
        notify.notify_one();
    });
    Json(json!({ "status": "shutting down" })).into_response()
}

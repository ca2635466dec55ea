//! Probe ingest and force/video-ended operations.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use decksync_engine::{VideoEndedAction, MAX_DECKS};
use decksync_events::DeckSample;
use serde::Deserialize;
use serde_json::json;

use crate::http::errors::ApiError;
use crate::state::ApiState;

/// `POST /api/deck/update`: one sample from the console probe.
///
/// Every accepted outcome (published, ignored deck, analyser busy, extra
/// deck) answers 204; only malformed bodies are client errors.
pub(crate) async fn deck_update(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<DeckSample>, JsonRejection>,
) -> Response {
    let Ok(Json(sample)) = body else {
        return ApiError::bad_request("invalid json").into_response();
    };
    state.engine.ingest(sample);
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Deserialize)]
pub(crate) struct ForceVideoRequest {
    #[serde(default)]
    path: String,
    #[serde(default)]
    deck: i32,
}

/// `POST /api/force-video`: force a library video on the current master.
pub(crate) async fn force_video(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<ForceVideoRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Ok(Json(request)) = body else {
        return Err(ApiError::bad_request("invalid json: path required"));
    };
    if request.path.is_empty() {
        return Err(ApiError::bad_request("invalid json: path required"));
    }

    let forced = state.engine.force_master_video(&request.path)?;
    Ok(Json(json!({ "status": "ok", "video": forced.file.name })).into_response())
}

/// `POST /api/force-deck-video`: force a library video on a specific deck.
pub(crate) async fn force_deck_video(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<ForceVideoRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Ok(Json(request)) = body else {
        return Err(ApiError::bad_request("invalid json: path and deck (1-4) required"));
    };
    if request.path.is_empty() || !(1..=MAX_DECKS).contains(&request.deck) {
        return Err(ApiError::bad_request("invalid json: path and deck (1-4) required"));
    }

    let forced = state
        .engine
        .force_deck_video(&request.path, request.deck)?;
    Ok(Json(json!({
        "status": "ok",
        "video": forced.file.name,
        "deck": request.deck,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VideoEndedRequest {
    #[serde(default)]
    deck: i32,
    #[serde(default)]
    match_level: i32,
    #[serde(default)]
    current_video: String,
}

/// `POST /api/deck/video-ended`: a client's video reached its natural end
/// while the song continues.
pub(crate) async fn video_ended(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<VideoEndedRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Ok(Json(request)) = body else {
        return Err(ApiError::bad_request("invalid json: deck required"));
    };
    if request.deck == 0 {
        return Err(ApiError::bad_request("invalid json: deck required"));
    }

    let action = state
        .engine
        .video_ended(request.deck, request.match_level, &request.current_video)?;
    let body = match action {
        VideoEndedAction::Loop => json!({ "action": "loop" }),
        VideoEndedAction::Switch { video } => json!({ "action": "switch", "video": video }),
    };
    Ok(Json(body).into_response())
}

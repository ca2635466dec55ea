//! CRUD for overlay elements.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::http::errors::ApiError;
use crate::state::ApiState;

/// `GET /api/overlay`: list every overlay element.
pub(crate) async fn list_elements(
    State(state): State<Arc<ApiState>>,
) -> Result<Response, ApiError> {
    let elements = state.overlays.list().await?;
    Ok(Json(elements).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ElementPayload {
    #[serde(default)]
    name: String,
    #[serde(default)]
    css: String,
    #[serde(default)]
    html: String,
    #[serde(default)]
    js: String,
    #[serde(default = "default_config")]
    config: String,
    #[serde(default)]
    show_over_transition: bool,
}

fn default_config() -> String {
    "{}".to_string()
}

/// `PUT /api/overlay/{id}`: update an element's editable fields.
pub(crate) async fn update_element(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    body: Result<Json<ElementPayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Ok(Json(payload)) = body else {
        return Err(ApiError::bad_request("invalid json"));
    };
    if payload.name.is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    state
        .overlays
        .update(
            id,
            &payload.name,
            &payload.css,
            &payload.html,
            &payload.js,
            &payload.config,
            payload.show_over_transition,
        )
        .await?;
    broadcast_overlay(&state).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
pub(crate) struct TogglePayload {
    #[serde(default)]
    enabled: bool,
}

/// `POST /api/overlay/{id}/toggle`: enable or disable an element.
pub(crate) async fn toggle_element(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    body: Result<Json<TogglePayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Ok(Json(payload)) = body else {
        return Err(ApiError::bad_request("invalid json"));
    };
    state.overlays.set_enabled(id, payload.enabled).await?;
    broadcast_overlay(&state).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `POST /api/overlay/{id}/restore`: reset a seeded element to defaults.
pub(crate) async fn restore_element(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let restored = state.overlays.restore_defaults(id).await?;
    broadcast_overlay(&state).await?;
    Ok(Json(restored).into_response())
}

/// Push the full element list so every player re-renders consistently.
async fn broadcast_overlay(state: &ApiState) -> Result<(), ApiError> {
    let elements = state.overlays.list().await?;
    state.engine.publish_overlay(elements);
    Ok(())
}

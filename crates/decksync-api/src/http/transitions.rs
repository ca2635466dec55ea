//! CRUD for the transition effect library.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use decksync_data::Direction;
use serde::Deserialize;

use crate::http::errors::ApiError;
use crate::state::ApiState;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct EffectListQuery {
    direction: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EffectPayload {
    #[serde(default)]
    name: String,
    #[serde(default)]
    direction: String,
    #[serde(default)]
    css: String,
}

impl EffectPayload {
    fn validate(&self) -> Result<Direction, ApiError> {
        let direction = Direction::parse(&self.direction);
        match direction {
            Some(direction) if !self.name.is_empty() && !self.css.is_empty() => Ok(direction),
            _ => Err(ApiError::bad_request(
                "name, direction (in/out), and css are required",
            )),
        }
    }
}

/// `GET /api/transitions[?direction=in|out]`: list effects.
pub(crate) async fn list_effects(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<EffectListQuery>,
) -> Result<Response, ApiError> {
    let direction = match query.direction.as_deref() {
        None | Some("") => None,
        Some(value) => Some(
            Direction::parse(value)
                .ok_or_else(|| ApiError::bad_request("direction must be in or out"))?,
        ),
    };
    let effects = state.effects.list(direction).await?;
    Ok(Json(effects).into_response())
}

/// `POST /api/transitions`: create a user effect.
pub(crate) async fn create_effect(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<EffectPayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Ok(Json(payload)) = body else {
        return Err(ApiError::bad_request("invalid json"));
    };
    let direction = payload.validate()?;
    let effect = state
        .effects
        .create(&payload.name, direction, &payload.css)
        .await?;
    state.engine.publish_transitions_updated();
    Ok((StatusCode::CREATED, Json(effect)).into_response())
}

/// `PUT /api/transitions/{id}`: update an effect.
pub(crate) async fn update_effect(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    body: Result<Json<EffectPayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Ok(Json(payload)) = body else {
        return Err(ApiError::bad_request("invalid json"));
    };
    let direction = payload.validate()?;
    state
        .effects
        .update(id, &payload.name, direction, &payload.css)
        .await?;
    state.engine.publish_transitions_updated();
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
pub(crate) struct TogglePayload {
    #[serde(default)]
    enabled: bool,
}

/// `POST /api/transitions/{id}/toggle`: enable or disable an effect.
pub(crate) async fn toggle_effect(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    body: Result<Json<TogglePayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Ok(Json(payload)) = body else {
        return Err(ApiError::bad_request("invalid json"));
    };
    state.effects.set_enabled(id, payload.enabled).await?;
    state.engine.publish_transitions_updated();
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `DELETE /api/transitions/{id}`: delete a user effect. Built-in seeds
/// answer 403.
pub(crate) async fn delete_effect(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    state.effects.delete(id).await?;
    state.engine.publish_transitions_updated();
    Ok(StatusCode::NO_CONTENT.into_response())
}

//! API error wrapper mapping engine and data errors to HTTP statuses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use decksync_data::DataError;
use decksync_engine::EngineError;
use serde_json::json;
use tracing::error;

/// Structured API error carried back to the client as `{"error": ...}`.
#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub(crate) fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NoMaster | EngineError::NoDeckState => Self::conflict(err.to_string()),
            EngineError::VideoNotFound | EngineError::NoVideos => {
                Self::not_found(err.to_string())
            }
            EngineError::DeckOutOfRange => Self::bad_request(err.to_string()),
        }
    }
}

impl From<DataError> for ApiError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::SeedProtected => Self::forbidden(err.to_string()),
            DataError::NotFound { .. } => Self::not_found(err.to_string()),
            DataError::QueryFailed { .. } => {
                error!(error = %err, "database error");
                Self::internal("db error")
            }
        }
    }
}

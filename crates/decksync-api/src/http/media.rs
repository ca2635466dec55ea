//! Library listings and video file serving.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::http::errors::ApiError;
use crate::state::ApiState;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct VideoListQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// `GET /api/videos[?type=transition]`: list a library's videos.
///
/// The configured directory is re-applied before listing so a dashboard
/// edit takes effect without a restart; the watcher reconciles content on
/// its next tick.
pub(crate) async fn list_videos(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<VideoListQuery>,
) -> Response {
    let transition = query.kind.as_deref() == Some("transition");
    let (index, config_key) = if transition {
        (state.engine.transitions(), "transition_videos_dir")
    } else {
        (state.engine.songs(), "videos_dir")
    };

    let configured = state.config.get(config_key, "");
    if !configured.is_empty() && index.dir().as_path() != Path::new(configured.as_str()) {
        index.set_dir(&configured);
    }
    Json(index.list_all()).into_response()
}

/// `GET /videos/{file}`: stream a song video from the library directory.
pub(crate) async fn serve_song_video(
    State(state): State<Arc<ApiState>>,
    UrlPath(file): UrlPath<String>,
    request: Request<Body>,
) -> Result<Response, ApiError> {
    let dir = state.engine.songs().dir();
    serve_from(&dir, &file, request).await
}

/// `GET /transition-videos/{file}`: stream a transition video.
pub(crate) async fn serve_transition_video(
    State(state): State<Arc<ApiState>>,
    UrlPath(file): UrlPath<String>,
    request: Request<Body>,
) -> Result<Response, ApiError> {
    let dir = state.engine.transitions().dir();
    serve_from(&dir, &file, request).await
}

/// Serve one flat file out of `dir`, refusing anything that is not a plain
/// filename. `ServeFile` handles range requests for the video element.
async fn serve_from(dir: &Path, file: &str, request: Request<Body>) -> Result<Response, ApiError> {
    let is_plain_name = Path::new(file)
        .file_name()
        .is_some_and(|name| name == Path::new(file).as_os_str());
    if !is_plain_name {
        return Err(ApiError::not_found("video not found"));
    }

    ServeFile::new(dir.join(file))
        .oneshot(request)
        .await
        .map(IntoResponse::into_response)
        .map_err(|err| ApiError::internal(format!("file serve failed: {err}")))
}

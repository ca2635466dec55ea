//! Router construction and server host for the API.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::{deck, media, overlay, settings, sse, transitions};
use crate::state::ApiState;

/// Probe sample bodies are tiny; anything larger is malformed.
const DECK_BODY_LIMIT: usize = 4 * 1024;

/// Effect and overlay payloads carry CSS/HTML/JS snippets.
const ADMIN_BODY_LIMIT: usize = 64 * 1024;

/// Axum router wrapper hosting the DeckSync HTTP surface.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Build the router over shared state.
    #[must_use]
    pub fn new(state: Arc<ApiState>) -> Self {
        let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                route = %request.uri().path(),
            )
        });
        let cors_layer = CorsLayer::new().allow_origin(Any);

        let deck_routes = Router::new()
            .route("/api/deck/update", post(deck::deck_update))
            .route("/api/force-video", post(deck::force_video))
            .route("/api/force-deck-video", post(deck::force_deck_video))
            .route("/api/deck/video-ended", post(deck::video_ended))
            .route("/api/config", get(settings::get_config).post(settings::set_config))
            .route("/api/loop-video", post(settings::loop_video))
            .layer(DefaultBodyLimit::max(DECK_BODY_LIMIT));

        let admin_routes = Router::new()
            .route(
                "/api/transitions",
                get(transitions::list_effects).post(transitions::create_effect),
            )
            .route(
                "/api/transitions/{id}",
                put(transitions::update_effect).delete(transitions::delete_effect),
            )
            .route(
                "/api/transitions/{id}/toggle",
                post(transitions::toggle_effect),
            )
            .route("/api/overlay", get(overlay::list_elements))
            .route("/api/overlay/{id}", put(overlay::update_element))
            .route("/api/overlay/{id}/toggle", post(overlay::toggle_element))
            .route("/api/overlay/{id}/restore", post(overlay::restore_element))
            .layer(DefaultBodyLimit::max(ADMIN_BODY_LIMIT));

        let router = Router::new()
            .merge(deck_routes)
            .merge(admin_routes)
            .route("/", get(settings::service_info))
            .route("/events", get(sse::stream_events))
            .route("/api/videos", get(media::list_videos))
            .route("/api/shutdown", post(settings::shutdown))
            .route("/videos/{*file}", get(media::serve_song_video))
            .route(
                "/transition-videos/{*file}",
                get(media::serve_transition_video),
            )
            .layer(cors_layer)
            .layer(trace_layer)
            .with_state(state);

        Self { router }
    }

    /// The underlying router, for in-process testing.
    #[must_use]
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve until the shutdown future resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the server terminates unexpectedly.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
    }
}

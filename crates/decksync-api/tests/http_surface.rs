//! End-to-end tests over the router, exercising handlers, status mapping,
//! and the engine underneath without a real listener.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use decksync_api::{ApiServer, ApiState};
use decksync_data::{ConfigStore, EffectStore, OverlayStore};
use decksync_engine::Engine;
use decksync_events::EventBus;
use decksync_library::LibraryIndex;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

struct App {
    router: Router,
    _song_dir: TempDir,
    _transition_dir: TempDir,
}

async fn app(song_files: &[&str]) -> App {
    let pool = decksync_data::open_in_memory().await.expect("open store");
    let config = ConfigStore::new(pool.clone()).await.expect("config");
    let effects = EffectStore::new(pool.clone()).await.expect("effects");
    let overlays = OverlayStore::new(pool);

    let song_dir = tempfile::tempdir().expect("song dir");
    for name in song_files {
        std::fs::write(song_dir.path().join(name), b"video-bytes").expect("write");
    }
    let transition_dir = tempfile::tempdir().expect("transition dir");

    config
        .set("videos_dir", &song_dir.path().to_string_lossy())
        .await
        .expect("set videos_dir");
    config
        .set(
            "transition_videos_dir",
            &transition_dir.path().to_string_lossy(),
        )
        .await
        .expect("set transition_videos_dir");

    let songs = Arc::new(LibraryIndex::new(song_dir.path(), "/videos/", None));
    songs.scan().await;
    let transitions = Arc::new(LibraryIndex::new(
        transition_dir.path(),
        "/transition-videos/",
        None,
    ));
    transitions.scan().await;

    let engine = Engine::new(
        EventBus::new(),
        config.clone(),
        effects.clone(),
        songs,
        transitions,
    );
    let state = Arc::new(ApiState::new(engine, config, effects, overlays));
    App {
        router: ApiServer::new(state).into_router(),
        _song_dir: song_dir,
        _transition_dir: transition_dir,
    }
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn deck_update_accepts_and_discards_out_of_range_decks() {
    let app = app(&["a_128bpm.mp4"]).await;

    for deck in [0, -3, 7] {
        let response = app
            .router
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/deck/update",
                json!({ "deck": deck, "filename": "x.mp3" }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT, "deck {deck}");
    }
}

#[tokio::test]
async fn deck_update_rejects_malformed_bodies() {
    let app = app(&[]).await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/deck/update")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .expect("request");
    let response = app.router.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deck_update_processes_valid_samples() {
    let app = app(&["techno_128bpm.mp4"]).await;
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/deck/update",
            json!({
                "deck": 1,
                "isAudible": true,
                "isPlaying": true,
                "volume": 0.8,
                "elapsedMs": 5000,
                "bpm": 128.0,
                "filename": "techno_128bpm.mp4",
                "pitch": 100.0
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn config_round_trips_and_broadcasts() {
    let app = app(&[]).await;

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/config",
            json!({ "key": "aspect_ratio", "value": "16:9" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .router
        .clone()
        .oneshot(get_request("/api/config"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let config = body_json(response).await;
    assert_eq!(config["aspect_ratio"], "16:9");
    assert_eq!(config["transition_duration"], "3");
}

#[tokio::test]
async fn videos_listing_returns_the_indexed_library() {
    let app = app(&["alpha_100bpm.mp4", "beta.mp4"]).await;
    let response = app
        .router
        .clone()
        .oneshot(get_request("/api/videos"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let listing = body_json(response).await;
    let items = listing.as_array().expect("array");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["name"], "alpha_100bpm.mp4");
    assert_eq!(items[0]["bpm"], 100.0);
    assert_eq!(items[1]["path"], "/videos/beta.mp4");
}

#[tokio::test]
async fn force_video_without_master_conflicts() {
    let app = app(&["a_128bpm.mp4"]).await;
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/force-video",
            json!({ "path": "/videos/a_128bpm.mp4" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn force_video_unknown_path_is_not_found() {
    let app = app(&["a_128bpm.mp4"]).await;
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/force-video",
            json!({ "path": "/videos/missing.mp4" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn force_flow_succeeds_once_a_master_exists() {
    let app = app(&["a_128bpm.mp4", "b_90bpm.mp4"]).await;

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/deck/update",
            json!({
                "deck": 1,
                "isAudible": true,
                "isPlaying": true,
                "volume": 0.9,
                "bpm": 128.0,
                "filename": "a_128bpm.mp4",
                "pitch": 100.0
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/force-video",
            json!({ "path": "/videos/b_90bpm.mp4" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["video"], "b_90bpm.mp4");
}

#[tokio::test]
async fn video_ended_requires_a_deck() {
    let app = app(&[]).await;
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/deck/video-ended",
            json!({ "matchLevel": 4, "currentVideo": "/videos/x.mp4" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn video_ended_low_level_answers_loop() {
    let app = app(&["a_128bpm.mp4"]).await;
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/deck/video-ended",
            json!({ "deck": 1, "matchLevel": 0, "currentVideo": "/videos/a_128bpm.mp4" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["action"], "loop");
}

#[tokio::test]
async fn transition_seeds_are_listed_and_protected() {
    let app = app(&[]).await;

    let response = app
        .router
        .clone()
        .oneshot(get_request("/api/transitions"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let effects = body_json(response).await;
    let effects = effects.as_array().expect("array");
    assert_eq!(effects.len(), 12);
    let first_id = effects[0]["id"].as_i64().expect("id");

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/api/transitions/{first_id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn transition_direction_filter_validates() {
    let app = app(&[]).await;
    let response = app
        .router
        .clone()
        .oneshot(get_request("/api/transitions?direction=sideways"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .router
        .clone()
        .oneshot(get_request("/api/transitions?direction=in"))
        .await
        .expect("response");
    let effects = body_json(response).await;
    assert_eq!(effects.as_array().expect("array").len(), 6);
}

#[tokio::test]
async fn overlay_seeds_are_listed() {
    let app = app(&[]).await;
    let response = app
        .router
        .clone()
        .oneshot(get_request("/api/overlay"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let elements = body_json(response).await;
    assert_eq!(elements.as_array().expect("array").len(), 6);
}

#[tokio::test]
async fn video_files_are_served_and_traversal_is_refused() {
    let app = app(&["clip.mp4"]).await;

    let response = app
        .router
        .clone()
        .oneshot(get_request("/videos/clip.mp4"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    assert_eq!(&bytes[..], b"video-bytes");

    let response = app
        .router
        .clone()
        .oneshot(get_request("/videos/..%2Fsecret.mp4"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn shutdown_acknowledges() {
    let app = app(&[]).await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/shutdown")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "shutting down");
}

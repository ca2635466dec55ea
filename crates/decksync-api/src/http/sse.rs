//! Server-sent events streaming with late-join replay.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::extract::State;
use axum::response::sse::{self, KeepAlive, Sse};
use decksync_events::EventBus;
use tracing::{debug, error};
use uuid::Uuid;

use crate::state::ApiState;

const SSE_KEEP_ALIVE_SECS: u64 = 15;

/// `GET /events`: subscribe to the coordination event stream.
///
/// The stream opens with a comment line, replays the cached state set, then
/// carries live events. Event names match the bus kinds; payloads are the
/// bare JSON objects.
pub(crate) async fn stream_events(
    State(state): State<Arc<ApiState>>,
) -> Sse<impl futures_core::Stream<Item = Result<sse::Event, Infallible>> + Send> {
    let client_id = Uuid::new_v4();
    debug!(
        client = %client_id,
        subscribers = state.bus.subscriber_count() + 1,
        "sse client connected"
    );

    let stream = event_sse_stream(state.bus.clone(), client_id);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS))
            .text("keep-alive"),
    )
}

fn event_sse_stream(
    bus: EventBus,
    client_id: Uuid,
) -> impl futures_core::Stream<Item = Result<sse::Event, Infallible>> + Send {
    stream! {
        yield Ok(sse::Event::default().comment("connected"));

        let mut subscription = bus.subscribe();
        while let Some(envelope) = subscription.next().await {
            match serde_json::to_string(&envelope.event) {
                Ok(payload) => {
                    yield Ok(sse::Event::default()
                        .id(envelope.id.to_string())
                        .event(envelope.event.kind())
                        .data(payload));
                }
                Err(err) => {
                    error!(error = %err, "failed to serialise SSE event payload");
                }
            }
        }
        debug!(client = %client_id, "sse stream closed");
    }
}

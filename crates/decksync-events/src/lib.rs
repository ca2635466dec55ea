//! Core event bus for the DeckSync platform.
//!
//! The bus provides a typed event enum, sequential identifiers, and a replay
//! cache holding the latest broadcast of each cached event kind (per deck or
//! per key where the kind is so keyed). New subscribers receive the cached
//! state in a fixed order before entering the live stream, so a late-joining
//! browser renders the current wall state immediately. Internally it uses
//! `tokio::broadcast` with a bounded buffer; when a subscriber falls behind,
//! the oldest events are dropped and a warning recorded, so a slow client can
//! never block publishers.

mod model;

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};
use tracing::warn;

pub use model::{DeckSample, MatchKind, OverlayElement, PoolSlot, VideoFile, VideoMatch};

/// Identifier assigned to each event emitted by the platform.
pub type EventId = u64;

/// Per-subscriber queue bound; overflow drops the oldest messages.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// Which library a `library-updated` event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryKind {
    Song,
    Transition,
}

/// Analyser state reported through `analysis-status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStage {
    Running,
    Done,
}

/// A normalised deck sample enriched with its match result, broadcast as
/// `deck-update`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckUpdate {
    #[serde(flatten)]
    pub sample: DeckSample,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoMatch>,
    /// Server-authoritative playhead for match levels 2+.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_elapsed_ms: Option<f64>,
}

/// Typed domain events surfaced across the system.
///
/// Serialisation is untagged: the wire payload is the bare object described
/// in the event table, while [`Event::kind`] supplies the SSE event name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Event {
    DeckUpdate(DeckUpdate),
    TransitionPool {
        slots: [Option<PoolSlot>; 3],
    },
    TransitionPlay {
        slot: usize,
        #[serde(rename = "inCSS", skip_serializing_if = "Option::is_none")]
        in_css: Option<String>,
        #[serde(rename = "outCSS", skip_serializing_if = "Option::is_none")]
        out_css: Option<String>,
    },
    DeckVisibility {
        deck: i32,
        visible: bool,
    },
    AnalysisStatus {
        status: AnalysisStage,
    },
    LibraryUpdated {
        #[serde(rename = "type")]
        library: LibraryKind,
    },
    ConfigUpdated {
        key: String,
        value: String,
    },
    OverlayUpdated {
        elements: Vec<OverlayElement>,
    },
    LoopVideoTransition {
        active: bool,
        #[serde(rename = "inCSS", skip_serializing_if = "Option::is_none")]
        in_css: Option<String>,
        #[serde(rename = "outCSS", skip_serializing_if = "Option::is_none")]
        out_css: Option<String>,
    },
    TransitionsUpdated {},
}

impl Event {
    /// Machine-friendly discriminator, used as the SSE event name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Event::DeckUpdate(_) => "deck-update",
            Event::TransitionPool { .. } => "transition-pool",
            Event::TransitionPlay { .. } => "transition-play",
            Event::DeckVisibility { .. } => "deck-visibility",
            Event::AnalysisStatus { .. } => "analysis-status",
            Event::LibraryUpdated { .. } => "library-updated",
            Event::ConfigUpdated { .. } => "config-updated",
            Event::OverlayUpdated { .. } => "overlay-updated",
            Event::LoopVideoTransition { .. } => "loop-video-transition",
            Event::TransitionsUpdated {} => "transitions-updated",
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventEnvelope {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

/// Latest broadcast per cached kind, keyed by deck or config key where the
/// kind is so keyed.
#[derive(Debug, Default)]
struct ReplayCache {
    analysis: Option<EventEnvelope>,
    visibility: BTreeMap<i32, EventEnvelope>,
    decks: BTreeMap<i32, EventEnvelope>,
    pool: Option<EventEnvelope>,
    config: BTreeMap<String, EventEnvelope>,
    overlay: Option<EventEnvelope>,
}

impl ReplayCache {
    fn record(&mut self, envelope: &EventEnvelope) {
        match &envelope.event {
            Event::DeckUpdate(update) => {
                self.decks.insert(update.sample.deck, envelope.clone());
            }
            Event::TransitionPool { .. } => self.pool = Some(envelope.clone()),
            Event::DeckVisibility { deck, .. } => {
                self.visibility.insert(*deck, envelope.clone());
            }
            Event::AnalysisStatus { .. } => self.analysis = Some(envelope.clone()),
            Event::ConfigUpdated { key, .. } => {
                self.config.insert(key.clone(), envelope.clone());
            }
            Event::OverlayUpdated { .. } => self.overlay = Some(envelope.clone()),
            Event::TransitionPlay { .. }
            | Event::LibraryUpdated { .. }
            | Event::LoopVideoTransition { .. }
            | Event::TransitionsUpdated {} => {}
        }
    }

    /// Replay order: analysis-status, deck-visibility, deck-update,
    /// transition-pool, config-updated, overlay-updated. Chosen to produce
    /// the fewest visual surprises on a late join.
    fn backlog(&self) -> VecDeque<EventEnvelope> {
        let mut backlog = VecDeque::new();
        if let Some(envelope) = &self.analysis {
            backlog.push_back(envelope.clone());
        }
        for envelope in self.visibility.values() {
            backlog.push_back(envelope.clone());
        }
        for envelope in self.decks.values() {
            backlog.push_back(envelope.clone());
        }
        if let Some(envelope) = &self.pool {
            backlog.push_back(envelope.clone());
        }
        for envelope in self.config.values() {
            backlog.push_back(envelope.clone());
        }
        if let Some(envelope) = &self.overlay {
            backlog.push_back(envelope.clone());
        }
        backlog
    }
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    cache: Arc<RwLock<ReplayCache>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            cache: Arc::new(RwLock::new(ReplayCache::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Construct a bus with the default per-subscriber queue bound.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIBER_QUEUE_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    ///
    /// Cached kinds also update the replay cache so late joiners observe the
    /// latest state.
    ///
    /// # Panics
    ///
    /// Panics if the replay cache lock has been poisoned.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut cache = self.cache.write().expect("replay cache lock poisoned");
            cache.record(&envelope);
        }

        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus. The returned stream yields the cached replay
    /// set first, then live events in publication order.
    ///
    /// # Panics
    ///
    /// Panics if the replay cache lock has been poisoned.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        let backlog = {
            let cache = self.cache.read().expect("replay cache lock poisoned");
            cache.backlog()
        };
        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from
/// the live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    ///
    /// Returns `None` once the bus has been dropped. A lagging subscriber
    /// skips the dropped events and keeps receiving from the oldest retained
    /// message.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "subscriber queue full; dropping oldest events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_update(deck: i32, filename: &str) -> Event {
        Event::DeckUpdate(DeckUpdate {
            sample: DeckSample {
                deck,
                filename: filename.to_string(),
                ..DeckSample::default()
            },
            timestamp: Utc::now(),
            video: None,
            video_elapsed_ms: None,
        })
    }

    #[tokio::test]
    async fn live_events_arrive_in_publication_order() {
        let bus = EventBus::with_capacity(16);
        let mut stream = bus.subscribe();

        for deck in 1..=3 {
            bus.publish(sample_update(deck, "a.mp4"));
        }

        let mut ids = Vec::new();
        for _ in 0..3 {
            let envelope = stream.next().await.expect("event");
            ids.push(envelope.id);
        }
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn replay_covers_cached_kinds_in_prescribed_order() {
        let bus = EventBus::with_capacity(16);

        bus.publish(sample_update(2, "b.mp4"));
        bus.publish(sample_update(1, "a.mp4"));
        bus.publish(Event::TransitionPool {
            slots: [None, None, None],
        });
        bus.publish(Event::AnalysisStatus {
            status: AnalysisStage::Done,
        });
        bus.publish(Event::DeckVisibility {
            deck: 3,
            visible: true,
        });
        bus.publish(Event::ConfigUpdated {
            key: "transition_duration".into(),
            value: "3".into(),
        });
        // Uncached kinds must not appear in the replay.
        bus.publish(Event::TransitionPlay {
            slot: 0,
            in_css: None,
            out_css: None,
        });
        bus.publish(Event::LibraryUpdated {
            library: LibraryKind::Song,
        });

        let mut stream = bus.subscribe();
        let mut kinds = Vec::new();
        for _ in 0..6 {
            kinds.push(stream.next().await.expect("replayed event").event.kind());
        }
        assert_eq!(
            kinds,
            vec![
                "analysis-status",
                "deck-visibility",
                "deck-update",
                "deck-update",
                "transition-pool",
                "config-updated",
            ]
        );
    }

    #[tokio::test]
    async fn deck_cache_holds_latest_update_per_deck() {
        let bus = EventBus::with_capacity(16);
        bus.publish(sample_update(1, "old.mp4"));
        bus.publish(sample_update(1, "new.mp4"));

        let mut stream = bus.subscribe();
        let envelope = stream.next().await.expect("replayed deck-update");
        match envelope.event {
            Event::DeckUpdate(update) => assert_eq!(update.sample.filename, "new.mp4"),
            other => panic!("expected deck-update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn config_cache_is_keyed_by_key() {
        let bus = EventBus::with_capacity(16);
        bus.publish(Event::ConfigUpdated {
            key: "loop_video".into(),
            value: "/videos/a.mp4".into(),
        });
        bus.publish(Event::ConfigUpdated {
            key: "transition_enabled".into(),
            value: "1".into(),
        });
        bus.publish(Event::ConfigUpdated {
            key: "loop_video".into(),
            value: "".into(),
        });

        let mut stream = bus.subscribe();
        let mut seen = Vec::new();
        for _ in 0..2 {
            match stream.next().await.expect("config replay").event {
                Event::ConfigUpdated { key, value } => seen.push((key, value)),
                other => panic!("expected config-updated, got {other:?}"),
            }
        }
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("loop_video".to_string(), String::new()),
                ("transition_enabled".to_string(), "1".to_string())
            ]
        );
    }

    #[test]
    fn payload_serialisation_is_untagged() {
        let event = Event::TransitionPlay {
            slot: 1,
            in_css: Some(".x{}".into()),
            out_css: None,
        };
        let value = serde_json::to_value(&event).expect("serializes");
        assert_eq!(value["slot"], 1);
        assert_eq!(value["inCSS"], ".x{}");
        assert!(value.get("outCSS").is_none());

        let poke = serde_json::to_value(Event::TransitionsUpdated {}).expect("serializes");
        assert_eq!(poke, serde_json::json!({}));

        let library = serde_json::to_value(Event::LibraryUpdated {
            library: LibraryKind::Transition,
        })
        .expect("serializes");
        assert_eq!(library["type"], "transition");
    }
}

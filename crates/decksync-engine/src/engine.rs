//! The coordination engine: sample ingest, forced overrides, master
//! election, the transition pool, deck visibility, and the loop-video
//! guard.
//!
//! All bus publishes on the ingest path happen under a single order lock so
//! that the sequence {`transition-play`, `transition-pool`, `deck-update`}
//! triggered by one sample is never interleaved with events from another.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use decksync_data::{ConfigStore, DataError, Direction, EffectStore};
use decksync_events::{
    AnalysisStage, DeckSample, DeckUpdate, Event, EventBus, LibraryKind, MatchKind, OverlayElement,
    PoolSlot, VideoMatch,
};
use decksync_library::{LibraryIndex, LEVEL_BPM, LEVEL_FUZZY};
use rand::Rng;
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

use crate::election::{elect_master, ActiveDeckRecord};
use crate::error::{EngineError, Result};
use crate::tracker::DeckVideoSync;

/// Maximum number of decks that participate; higher numbers are counted
/// only.
pub const MAX_DECKS: i32 = 4;

const POOL_SLOTS: usize = 3;

/// How long a paused deck 3/4 waits before being hidden.
const DECK_HIDE_DELAY: Duration = Duration::from_secs(60);

/// Minimum spacing between numeric-only deck log lines.
const NUMERIC_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// What happened to an ingested sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Dropped because the BPM analyser is running.
    AnalyserBusy,
    /// Deck below 1; silently discarded.
    IgnoredDeck,
    /// Deck above [`MAX_DECKS`]; counted, nothing published.
    ExtraDeck,
    /// Fully processed and broadcast.
    Published,
}

/// Reply for a client whose video ended before its song.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoEndedAction {
    /// Keep looping the same video locally.
    Loop,
    /// Switch to the named video (already broadcast as a deck-update).
    Switch { video: String },
}

struct ForcedOverride {
    video: VideoMatch,
    /// Deck filename at the time the override was installed; the override
    /// dies when the deck loads anything else.
    filename: String,
}

struct ActiveState {
    records: HashMap<i32, ActiveDeckRecord>,
    master: i32,
    pool: [Option<PoolSlot>; 3],
    next_slot: usize,
}

struct DeckLog {
    sample: DeckSample,
    last_numeric_log: Option<Instant>,
}

#[derive(Default)]
struct VisibilityState {
    visible: HashMap<i32, bool>,
    timers: HashMap<i32, AbortHandle>,
}

struct Inner {
    bus: EventBus,
    config: ConfigStore,
    effects: EffectStore,
    songs: Arc<LibraryIndex>,
    transitions: Arc<LibraryIndex>,
    analysing: AtomicBool,
    forced: Mutex<HashMap<i32, ForcedOverride>>,
    video_sync: Mutex<HashMap<i32, DeckVideoSync>>,
    active: Mutex<ActiveState>,
    deck_states: Mutex<HashMap<i32, DeckLog>>,
    visibility: Mutex<VisibilityState>,
    extra_decks: Mutex<HashSet<i32>>,
    /// Serialises every publish on the ingest path; see the module docs.
    publish_order: Mutex<()>,
    hide_delay: Duration,
}

/// Handle to the coordination core. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// Construct the engine over its collaborators.
    #[must_use]
    pub fn new(
        bus: EventBus,
        config: ConfigStore,
        effects: EffectStore,
        songs: Arc<LibraryIndex>,
        transitions: Arc<LibraryIndex>,
    ) -> Self {
        Self::with_hide_delay(bus, config, effects, songs, transitions, DECK_HIDE_DELAY)
    }

    /// As [`Engine::new`] but with a custom deck-hide delay.
    #[must_use]
    pub fn with_hide_delay(
        bus: EventBus,
        config: ConfigStore,
        effects: EffectStore,
        songs: Arc<LibraryIndex>,
        transitions: Arc<LibraryIndex>,
        hide_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus,
                config,
                effects,
                songs,
                transitions,
                analysing: AtomicBool::new(false),
                forced: Mutex::new(HashMap::new()),
                video_sync: Mutex::new(HashMap::new()),
                active: Mutex::new(ActiveState {
                    records: HashMap::new(),
                    master: 0,
                    pool: [None, None, None],
                    next_slot: 0,
                }),
                deck_states: Mutex::new(HashMap::new()),
                visibility: Mutex::new(VisibilityState::default()),
                extra_decks: Mutex::new(HashSet::new()),
                publish_order: Mutex::new(()),
                hide_delay,
            }),
        }
    }

    /// The shared event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Song video index.
    #[must_use]
    pub fn songs(&self) -> &Arc<LibraryIndex> {
        &self.inner.songs
    }

    /// Transition video index.
    #[must_use]
    pub fn transitions(&self) -> &Arc<LibraryIndex> {
        &self.inner.transitions
    }

    /// Whether the BPM analyser is currently running.
    #[must_use]
    pub fn is_analysing(&self) -> bool {
        self.inner.analysing.load(Ordering::Relaxed)
    }

    /// Number of distinct out-of-range decks seen.
    #[must_use]
    pub fn extra_deck_count(&self) -> usize {
        self.inner
            .extra_decks
            .lock()
            .expect("extra decks lock poisoned")
            .len()
    }

    /// Current master deck, 0 when none.
    #[must_use]
    pub fn master_deck(&self) -> i32 {
        self.inner.active.lock().expect("active lock poisoned").master
    }

    /// Flip the analyser flag and broadcast the status change.
    pub fn set_analysing(&self, running: bool) {
        self.inner.analysing.store(running, Ordering::Relaxed);
        let status = if running {
            AnalysisStage::Running
        } else {
            AnalysisStage::Done
        };
        self.inner.bus.publish(Event::AnalysisStatus { status });
    }

    /// Ingest one deck sample from the probe.
    pub fn ingest(&self, sample: DeckSample) -> IngestOutcome {
        if self.is_analysing() {
            return IngestOutcome::AnalyserBusy;
        }
        if sample.deck < 1 {
            return IngestOutcome::IgnoredDeck;
        }
        if sample.deck > MAX_DECKS {
            let mut extras = self
                .inner
                .extra_decks
                .lock()
                .expect("extra decks lock poisoned");
            if extras.insert(sample.deck) {
                warn!(
                    deck = sample.deck,
                    extras = extras.len(),
                    "sample from unsupported deck; counted only"
                );
            }
            return IngestOutcome::ExtraDeck;
        }

        let matched = self.resolve_match(&sample);
        let video_elapsed_ms = matched
            .as_ref()
            .filter(|matched| matched.level >= LEVEL_FUZZY)
            .map(|matched| self.advance_video_sync(&sample, matched));

        {
            // Master election must complete before the deck-update goes out
            // so any transition events precede the sample that caused them.
            let _order = self
                .inner
                .publish_order
                .lock()
                .expect("publish order lock poisoned");
            self.check_master_change(&sample, matched.is_some());
            self.inner.bus.publish(Event::DeckUpdate(DeckUpdate {
                sample: sample.clone(),
                timestamp: Utc::now(),
                video: matched,
                video_elapsed_ms,
            }));
        }

        if sample.deck > 2 {
            self.update_visibility(sample.deck, sample.is_playing);
        }
        self.log_sample(&sample);
        IngestOutcome::Published
    }

    /// Force a library video onto the current master deck.
    ///
    /// # Errors
    ///
    /// Fails when the video is unknown, no master exists, or the master has
    /// not reported a sample yet.
    pub fn force_master_video(&self, path: &str) -> Result<VideoMatch> {
        let file = self
            .inner
            .songs
            .get_by_path(path)
            .ok_or(EngineError::VideoNotFound)?;
        let master = self.master_deck();
        if master == 0 {
            return Err(EngineError::NoMaster);
        }
        let sample = self.last_sample(master).ok_or(EngineError::NoDeckState)?;

        // Forced matches report at the BPM level so clients apply rate
        // calculation rather than elapsed-time sync.
        let forced = VideoMatch {
            file,
            level: LEVEL_BPM,
            kind: MatchKind::Forced,
            similarity: 1.0,
        };
        self.install_override(master, &sample, forced.clone());

        {
            let _order = self
                .inner
                .publish_order
                .lock()
                .expect("publish order lock poisoned");
            {
                let mut state = self.inner.active.lock().expect("active lock poisoned");
                self.play_and_refill(&mut state);
            }
            self.publish_forced_update(&sample, forced.clone());
        }

        info!(deck = master, video = %forced.file.name, "video forced");
        Ok(forced)
    }

    /// Force a library video onto a specific deck. A transition plays only
    /// when the deck is the current master; decks 3/4 become visible.
    ///
    /// # Errors
    ///
    /// Fails when the deck is out of range, the video is unknown, or the
    /// deck has not reported a sample yet.
    pub fn force_deck_video(&self, path: &str, deck: i32) -> Result<VideoMatch> {
        if !(1..=MAX_DECKS).contains(&deck) {
            return Err(EngineError::DeckOutOfRange);
        }
        let file = self
            .inner
            .songs
            .get_by_path(path)
            .ok_or(EngineError::VideoNotFound)?;
        let sample = self.last_sample(deck).ok_or(EngineError::NoDeckState)?;

        let forced = VideoMatch {
            file,
            level: LEVEL_BPM,
            kind: MatchKind::Forced,
            similarity: 1.0,
        };
        self.install_override(deck, &sample, forced.clone());

        {
            let _order = self
                .inner
                .publish_order
                .lock()
                .expect("publish order lock poisoned");
            {
                let mut state = self.inner.active.lock().expect("active lock poisoned");
                if state.master == deck {
                    self.play_and_refill(&mut state);
                }
            }
            self.publish_forced_update(&sample, forced.clone());
        }

        if deck > 2 {
            self.update_visibility(deck, true);
        }
        info!(deck, video = %forced.file.name, "video forced on deck");
        Ok(forced)
    }

    /// Handle a client report that its video finished before the song.
    ///
    /// # Errors
    ///
    /// Fails when the deck is out of range, has no recorded sample, or the
    /// library is empty.
    pub fn video_ended(
        &self,
        deck: i32,
        match_level: i32,
        current_video: &str,
    ) -> Result<VideoEndedAction> {
        if !(1..=MAX_DECKS).contains(&deck) {
            return Err(EngineError::DeckOutOfRange);
        }

        if match_level <= 1 {
            // Exact/stem videos track the song; the client loops locally
            // and the pool is rotated for next time.
            let _order = self
                .inner
                .publish_order
                .lock()
                .expect("publish order lock poisoned");
            self.rotate_pool_locked();
            info!(deck, level = match_level, "video ended (loop)");
            return Ok(VideoEndedAction::Loop);
        }

        let sample = self.last_sample(deck).ok_or(EngineError::NoDeckState)?;
        let replacement = self
            .inner
            .songs
            .random_excluding(current_video, sample.bpm)
            .ok_or(EngineError::NoVideos)?;

        if replacement.file.path == current_video {
            let _order = self
                .inner
                .publish_order
                .lock()
                .expect("publish order lock poisoned");
            self.rotate_pool_locked();
            info!(deck, "video ended (loop, single video)");
            return Ok(VideoEndedAction::Loop);
        }

        self.install_override(deck, &sample, replacement.clone());
        {
            let _order = self
                .inner
                .publish_order
                .lock()
                .expect("publish order lock poisoned");
            self.publish_forced_update(&sample, replacement.clone());
            self.rotate_pool_locked();
        }
        info!(
            deck,
            from = %current_video,
            to = %replacement.file.path,
            "video ended (switch)"
        );
        Ok(VideoEndedAction::Switch {
            video: replacement.file.name,
        })
    }

    /// Persist a config value and broadcast the change.
    ///
    /// # Errors
    ///
    /// Returns the data-layer error when the write fails; nothing is
    /// broadcast in that case.
    pub async fn set_config(&self, key: &str, value: &str) -> std::result::Result<(), DataError> {
        self.inner.config.set(key, value).await?;
        self.inner.bus.publish(Event::ConfigUpdated {
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    /// Broadcast that a library changed; for the song library also verify
    /// the configured loop video still exists.
    pub async fn library_updated(&self, library: LibraryKind) {
        self.inner.bus.publish(Event::LibraryUpdated { library });
        info!(?library, "library updated broadcast");
        if library == LibraryKind::Song {
            self.check_loop_video().await;
        }
    }

    /// Broadcast the full overlay element list.
    pub fn publish_overlay(&self, elements: Vec<OverlayElement>) {
        self.inner.bus.publish(Event::OverlayUpdated { elements });
    }

    /// Poke clients to refresh their transition effect lists.
    pub fn publish_transitions_updated(&self) {
        self.inner.bus.publish(Event::TransitionsUpdated {});
    }

    /// Switch every player to or away from the loop video, with the same
    /// randomly chosen CSS pair on each of them.
    pub fn loop_video_transition(&self, active: bool) {
        let in_css = self
            .inner
            .effects
            .random_enabled(Direction::In)
            .map(|effect| effect.css);
        let out_css = self
            .inner
            .effects
            .random_enabled(Direction::Out)
            .map(|effect| effect.css);
        self.inner.bus.publish(Event::LoopVideoTransition {
            active,
            in_css,
            out_css,
        });
        info!(active, "loop video transition broadcast");
    }

    fn resolve_match(&self, sample: &DeckSample) -> Option<VideoMatch> {
        {
            let mut forced = self.inner.forced.lock().expect("forced lock poisoned");
            if let Some(override_) = forced.get(&sample.deck) {
                if override_.filename == sample.filename {
                    return Some(override_.video.clone());
                }
                // The deck loaded a different song: the override dies and
                // normal matching resumes.
                forced.remove(&sample.deck);
            }
        }
        self.inner.songs.match_video(&sample.filename, sample.bpm)
    }

    fn advance_video_sync(&self, sample: &DeckSample, matched: &VideoMatch) -> f64 {
        let now = Instant::now();
        let mut sync = self
            .inner
            .video_sync
            .lock()
            .expect("video sync lock poisoned");
        let entry = sync
            .entry(sample.deck)
            .or_insert_with(|| DeckVideoSync::reset(&matched.file.path, now, false));
        entry.advance(
            now,
            &matched.file.path,
            sample.pitch,
            sample.bpm,
            matched.file.bpm,
            sample.is_playing,
        )
    }

    /// Recompute the master deck for a fresh sample and drive transitions.
    /// Must be called with the publish-order lock held.
    fn check_master_change(&self, sample: &DeckSample, has_video: bool) {
        let mut state = self.inner.active.lock().expect("active lock poisoned");

        let record = state.records.entry(sample.deck).or_default();
        record.audible = sample.is_audible;
        record.playing = sample.is_playing;
        record.volume = sample.volume;
        record.has_video = has_video;

        let previous = state.master;
        let elected = elect_master(&state.records, previous);
        if elected == previous {
            return;
        }
        state.master = elected;
        info!(from = previous, to = elected, "master deck changed");

        if previous == 0 {
            // First master: fill the pool so clients can preload ahead of
            // the first handover. No transition plays.
            self.fill_pool(&mut state);
            self.broadcast_pool(&state);
        } else {
            self.play_and_refill(&mut state);
        }
    }

    /// Pick a random transition video, excluding the given served paths to
    /// keep the pool free of duplicates.
    fn pick_random_transition(&self, exclude: &[String]) -> Option<PoolSlot> {
        let configured = self.inner.config.get("transition_videos_dir", "");
        if !configured.is_empty()
            && self.inner.transitions.dir().as_path() != Path::new(configured.as_str())
        {
            self.inner.transitions.set_dir(&configured);
        }

        let videos = self.inner.transitions.list_all();
        if videos.is_empty() {
            return None;
        }

        let candidates: Vec<_> = if exclude.is_empty() || videos.len() <= 1 {
            videos.iter().collect()
        } else {
            let filtered: Vec<_> = videos
                .iter()
                .filter(|video| !exclude.contains(&video.path))
                .collect();
            if filtered.is_empty() {
                videos.iter().collect()
            } else {
                filtered
            }
        };

        let picked = candidates[rand::rng().random_range(0..candidates.len())];
        Some(PoolSlot {
            video: picked.path.clone(),
            bpm: picked.bpm,
        })
    }

    fn fill_pool(&self, state: &mut ActiveState) {
        for slot in 0..POOL_SLOTS {
            if state.pool[slot].is_none() {
                let exclude = other_slot_paths(&state.pool, slot);
                state.pool[slot] = self.pick_random_transition(&exclude);
            }
        }
    }

    fn broadcast_pool(&self, state: &ActiveState) {
        self.inner.bus.publish(Event::TransitionPool {
            slots: state.pool.clone(),
        });
        info!(slots = ?state.pool, "transition pool broadcast");
    }

    /// Tell clients to play the next slot, then refill it and broadcast the
    /// updated pool. Must be called with the publish-order lock held.
    fn play_and_refill(&self, state: &mut ActiveState) {
        let slot = state.next_slot;
        let in_css = self
            .inner
            .effects
            .random_enabled(Direction::In)
            .map(|effect| effect.css);
        let out_css = self
            .inner
            .effects
            .random_enabled(Direction::Out)
            .map(|effect| effect.css);
        self.inner.bus.publish(Event::TransitionPlay {
            slot,
            in_css,
            out_css,
        });
        let played = state.pool[slot]
            .as_ref()
            .map(|entry| entry.video.clone())
            .unwrap_or_default();
        info!(slot, video = %played, "transition play");

        state.next_slot = (slot + 1) % POOL_SLOTS;
        let exclude = other_slot_paths(&state.pool, slot);
        state.pool[slot] = self.pick_random_transition(&exclude);
        self.broadcast_pool(state);
    }

    /// Rotate the next slot without playing a transition (video-ended
    /// loops). Must be called with the publish-order lock held.
    fn rotate_pool_locked(&self) {
        let mut state = self.inner.active.lock().expect("active lock poisoned");
        let slot = state.next_slot;
        let exclude = other_slot_paths(&state.pool, slot);
        state.pool[slot] = self.pick_random_transition(&exclude);
        state.next_slot = (slot + 1) % POOL_SLOTS;
        self.broadcast_pool(&state);
    }

    fn install_override(&self, deck: i32, sample: &DeckSample, video: VideoMatch) {
        let now = Instant::now();
        {
            let mut sync = self
                .inner
                .video_sync
                .lock()
                .expect("video sync lock poisoned");
            sync.insert(
                deck,
                DeckVideoSync::reset(&video.file.path, now, sample.is_playing),
            );
        }
        let mut forced = self.inner.forced.lock().expect("forced lock poisoned");
        forced.insert(
            deck,
            ForcedOverride {
                video,
                filename: sample.filename.clone(),
            },
        );
    }

    /// Re-broadcast a deck-update carrying a forced video with the playhead
    /// reset to zero. Must be called with the publish-order lock held.
    fn publish_forced_update(&self, sample: &DeckSample, video: VideoMatch) {
        self.inner.bus.publish(Event::DeckUpdate(DeckUpdate {
            sample: sample.clone(),
            timestamp: Utc::now(),
            video: Some(video),
            video_elapsed_ms: Some(0.0),
        }));
    }

    /// Manage the deck 3/4 auto-hide timers.
    fn update_visibility(&self, deck: i32, playing: bool) {
        let mut visibility = self
            .inner
            .visibility
            .lock()
            .expect("visibility lock poisoned");

        if playing {
            if let Some(timer) = visibility.timers.remove(&deck) {
                timer.abort();
            }
            if !visibility.visible.get(&deck).copied().unwrap_or(false) {
                visibility.visible.insert(deck, true);
                self.inner
                    .bus
                    .publish(Event::DeckVisibility { deck, visible: true });
                info!(deck, visible = true, "deck visibility");
            }
            return;
        }

        if !visibility.visible.get(&deck).copied().unwrap_or(false)
            || visibility.timers.contains_key(&deck)
        {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let delay = self.inner.hide_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut visibility = inner.visibility.lock().expect("visibility lock poisoned");
            visibility.visible.insert(deck, false);
            visibility.timers.remove(&deck);
            inner
                .bus
                .publish(Event::DeckVisibility { deck, visible: false });
            info!(deck, visible = false, "deck visibility");
        });
        visibility.timers.insert(deck, handle.abort_handle());
    }

    fn last_sample(&self, deck: i32) -> Option<DeckSample> {
        let states = self
            .inner
            .deck_states
            .lock()
            .expect("deck states lock poisoned");
        states.get(&deck).map(|entry| entry.sample.clone())
    }

    /// State-change log lines fire immediately; numeric-only changes are
    /// throttled to one line per second per deck.
    fn log_sample(&self, sample: &DeckSample) {
        let mut states = self
            .inner
            .deck_states
            .lock()
            .expect("deck states lock poisoned");
        let previous = states.get(&sample.deck);

        let key_changed = previous.is_none_or(|entry| {
            entry.sample.is_audible != sample.is_audible
                || entry.sample.is_playing != sample.is_playing
                || entry.sample.filename != sample.filename
        });
        if key_changed {
            info!(
                deck = sample.deck,
                audible = sample.is_audible,
                playing = sample.is_playing,
                filename = %sample.filename,
                "deck state"
            );
        }

        let numeric_changed = previous.is_none_or(|entry| {
            entry.sample.bpm != sample.bpm
                || entry.sample.volume != sample.volume
                || entry.sample.elapsed_ms != sample.elapsed_ms
                || entry.sample.pitch != sample.pitch
        });
        let throttle_open = previous
            .and_then(|entry| entry.last_numeric_log)
            .is_none_or(|last| last.elapsed() >= NUMERIC_LOG_INTERVAL);

        let mut last_numeric_log = previous.and_then(|entry| entry.last_numeric_log);
        if numeric_changed && throttle_open {
            info!(
                deck = sample.deck,
                bpm = sample.bpm,
                volume = sample.volume,
                elapsed_ms = sample.elapsed_ms,
                pitch = sample.pitch,
                "deck data"
            );
            last_numeric_log = Some(Instant::now());
        }

        states.insert(
            sample.deck,
            DeckLog {
                sample: sample.clone(),
                last_numeric_log,
            },
        );
    }

    async fn check_loop_video(&self) {
        let loop_path = self.inner.config.get("loop_video", "");
        if loop_path.is_empty() {
            return;
        }
        if self.inner.songs.get_by_path(&loop_path).is_some() {
            return;
        }

        info!(path = %loop_path, "loop video no longer in library, clearing config");
        if let Err(err) = self.set_config("loop_video", "").await {
            error!(error = %err, "failed to clear loop_video config");
            return;
        }
        if self.inner.config.get("loop_video_enabled", "0") == "1" {
            if let Err(err) = self.set_config("loop_video_enabled", "0").await {
                error!(error = %err, "failed to clear loop_video_enabled config");
            }
        }
    }
}

fn other_slot_paths(pool: &[Option<PoolSlot>; 3], slot: usize) -> Vec<String> {
    pool.iter()
        .enumerate()
        .filter(|(index, entry)| *index != slot && entry.is_some())
        .filter_map(|(_, entry)| entry.as_ref().map(|slot| slot.video.clone()))
        .collect()
}

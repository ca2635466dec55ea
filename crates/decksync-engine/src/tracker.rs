//! Server-side video position tracking for match levels 2 and above.
//!
//! Videos at those levels do not correspond to the playing song, so the
//! song's own elapsed time is useless for seeking. Instead the server
//! accumulates playback milliseconds at the effective rate and every client
//! seeks against the shared value.

use std::time::Instant;

/// Playback rate clamps applied by clients and mirrored here.
const MIN_RATE: f64 = 0.25;
const MAX_RATE: f64 = 4.0;

/// Effective playback rate for a deck/video pairing. When both BPMs are
/// known the video is tempo-matched to the deck; otherwise only the pitch
/// applies.
#[must_use]
pub fn playback_rate(pitch: f64, deck_bpm: f64, video_bpm: f64) -> f64 {
    let mut rate = pitch / 100.0;
    if deck_bpm > 0.0 && video_bpm > 0.0 {
        rate = (pitch / 100.0) * (deck_bpm / video_bpm);
    }
    rate.clamp(MIN_RATE, MAX_RATE)
}

/// Accumulated playback position for one deck.
#[derive(Debug)]
pub(crate) struct DeckVideoSync {
    video_path: String,
    last_update: Instant,
    accumulated_ms: f64,
    last_rate: f64,
    playing: bool,
}

impl DeckVideoSync {
    pub(crate) fn reset(video_path: &str, now: Instant, playing: bool) -> Self {
        Self {
            video_path: video_path.to_string(),
            last_update: now,
            accumulated_ms: 0.0,
            last_rate: 1.0,
            playing,
        }
    }

    /// Advance the accumulator for a new sample and return the playhead in
    /// milliseconds. A changed video path zeroes the accumulator; time only
    /// accrues while the deck was playing at the previous update.
    pub(crate) fn advance(
        &mut self,
        now: Instant,
        video_path: &str,
        pitch: f64,
        deck_bpm: f64,
        video_bpm: f64,
        playing: bool,
    ) -> f64 {
        if self.video_path != video_path {
            self.video_path = video_path.to_string();
            self.accumulated_ms = 0.0;
            self.last_update = now;
            self.last_rate = 1.0;
            self.playing = false;
        }

        if self.playing {
            let elapsed_ms = now.duration_since(self.last_update).as_secs_f64() * 1000.0;
            self.accumulated_ms += elapsed_ms * self.last_rate;
        }

        self.last_rate = playback_rate(pitch, deck_bpm, video_bpm);
        self.last_update = now;
        self.playing = playing;
        self.accumulated_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rate_falls_back_to_pitch_when_a_bpm_is_unknown() {
        assert_eq!(playback_rate(100.0, 0.0, 128.0), 1.0);
        assert_eq!(playback_rate(50.0, 128.0, 0.0), 0.5);
    }

    #[test]
    fn rate_tempo_matches_when_both_bpms_known() {
        assert_eq!(playback_rate(100.0, 140.0, 70.0), 2.0);
        assert_eq!(playback_rate(200.0, 100.0, 100.0), 2.0);
    }

    #[test]
    fn rate_is_clamped_to_bounds() {
        assert_eq!(playback_rate(100.0, 200.0, 25.0), 4.0);
        assert_eq!(playback_rate(10.0, 100.0, 100.0), 0.25);
        assert_eq!(playback_rate(25.0, 50.0, 200.0), 0.25);
    }

    #[test]
    fn accumulates_only_while_playing() {
        let start = Instant::now();
        let mut sync = DeckVideoSync::reset("/videos/a.mp4", start, false);

        // Paused at previous update: nothing accrues.
        let at_one = start + Duration::from_millis(1_000);
        assert_eq!(
            sync.advance(at_one, "/videos/a.mp4", 100.0, 0.0, 0.0, true),
            0.0
        );

        // Playing for one second at rate 1.0.
        let at_two = at_one + Duration::from_millis(1_000);
        let elapsed = sync.advance(at_two, "/videos/a.mp4", 100.0, 0.0, 0.0, true);
        assert!((elapsed - 1_000.0).abs() < 1.0);
    }

    #[test]
    fn rate_scales_accrued_time() {
        let start = Instant::now();
        let mut sync = DeckVideoSync::reset("/videos/a.mp4", start, true);

        // Previous rate 1.0 for the first second, then 2.0 for the next.
        let at_one = start + Duration::from_millis(1_000);
        sync.advance(at_one, "/videos/a.mp4", 100.0, 140.0, 70.0, true);
        let at_two = at_one + Duration::from_millis(1_000);
        let elapsed = sync.advance(at_two, "/videos/a.mp4", 100.0, 140.0, 70.0, true);
        assert!((elapsed - 3_000.0).abs() < 1.0, "1s at 1.0 + 1s at 2.0");
    }

    #[test]
    fn video_change_zeroes_the_accumulator() {
        let start = Instant::now();
        let mut sync = DeckVideoSync::reset("/videos/a.mp4", start, true);
        let at_one = start + Duration::from_millis(500);
        sync.advance(at_one, "/videos/a.mp4", 100.0, 0.0, 0.0, true);

        let at_two = at_one + Duration::from_millis(500);
        let elapsed = sync.advance(at_two, "/videos/b.mp4", 100.0, 0.0, 0.0, true);
        assert_eq!(elapsed, 0.0);
    }

    #[test]
    fn playhead_is_monotonic_while_playing_same_video() {
        let start = Instant::now();
        let mut sync = DeckVideoSync::reset("/videos/a.mp4", start, true);
        let mut previous = 0.0;
        for step in 1..10 {
            let at = start + Duration::from_millis(step * 100);
            let elapsed = sync.advance(at, "/videos/a.mp4", 100.0, 120.0, 120.0, true);
            assert!(elapsed >= previous);
            previous = elapsed;
        }
    }
}

//! Wire models shared across the platform and carried inside events.

use serde::{Deserialize, Serialize};

/// One deck sample as posted by the console probe.
///
/// Extra fields in the request body are ignored; missing numerics default to
/// zero and missing strings to empty, matching the probe contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeckSample {
    pub deck: i32,
    pub is_audible: bool,
    pub is_playing: bool,
    /// Fader volume in `[0.0, 1.0]`.
    pub volume: f64,
    /// Elapsed song time in milliseconds, probe-authoritative.
    pub elapsed_ms: i64,
    pub bpm: f64,
    /// Loaded track filename, without path.
    pub filename: String,
    /// Pitch percentage, 100 = neutral.
    pub pitch: f64,
    pub total_time_ms: i64,
    pub title: String,
    pub artist: String,
}

/// A video available for playback in one of the libraries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoFile {
    pub name: String,
    /// Served path, e.g. `/videos/foo.mp4`.
    pub path: String,
    /// Detected BPM; `0.0` means unknown.
    #[serde(default, skip_serializing_if = "bpm_is_unknown")]
    pub bpm: f64,
}

pub(crate) fn bpm_is_unknown(bpm: &f64) -> bool {
    *bpm <= 0.0
}

fn similarity_is_zero(similarity: &f64) -> bool {
    *similarity <= 0.0
}

/// How a track was mapped to a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchKind {
    Exact,
    Stem,
    Fuzzy,
    BpmFuzzy,
    Bpm,
    Random,
    Forced,
}

/// A matched video together with its match ranking.
///
/// The file fields are flattened so the wire shape is a single object:
/// `{name, path, bpm, matchLevel, matchType, similarity}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMatch {
    #[serde(flatten)]
    pub file: VideoFile,
    /// Tiered match level, 0 (best) to 5 (worst).
    #[serde(rename = "matchLevel")]
    pub level: u8,
    #[serde(rename = "matchType")]
    pub kind: MatchKind,
    /// Filename similarity in `[0.0, 1.0]`.
    #[serde(default, skip_serializing_if = "similarity_is_zero")]
    pub similarity: f64,
}

/// One slot of the three-slot transition preload pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSlot {
    /// Served path of the transition video.
    pub video: String,
    #[serde(default, skip_serializing_if = "bpm_is_unknown")]
    pub bpm: f64,
}

/// A configurable on-screen overlay element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayElement {
    pub id: i64,
    /// Unique identifier, e.g. `progress`, `bpm`, `song_name`.
    pub key: String,
    pub name: String,
    pub enabled: bool,
    pub css: String,
    /// HTML template using `{{value}}` placeholders.
    pub html: String,
    /// Per-frame JavaScript logic.
    pub js: String,
    /// Built-in element; cannot be deleted, only disabled.
    pub is_seed: bool,
    /// `verb` or `custom`.
    pub data_type: String,
    /// Console verb used to obtain data, empty for custom elements.
    pub verb: String,
    /// JSON configuration blob.
    pub config: String,
    pub show_over_transition: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deck_sample_defaults_missing_fields() {
        let sample: DeckSample =
            serde_json::from_str(r#"{"deck":2,"filename":"a.mp4","unknown":true}"#)
                .expect("sample parses");
        assert_eq!(sample.deck, 2);
        assert_eq!(sample.filename, "a.mp4");
        assert!(!sample.is_playing);
        assert_eq!(sample.volume, 0.0);
        assert_eq!(sample.title, "");
    }

    #[test]
    fn video_match_flattens_file_fields() {
        let matched = VideoMatch {
            file: VideoFile {
                name: "a.mp4".into(),
                path: "/videos/a.mp4".into(),
                bpm: 128.0,
            },
            level: 0,
            kind: MatchKind::Exact,
            similarity: 1.0,
        };
        let value = serde_json::to_value(&matched).expect("serializes");
        assert_eq!(value["name"], "a.mp4");
        assert_eq!(value["matchLevel"], 0);
        assert_eq!(value["matchType"], "exact");
        assert_eq!(value["similarity"], 1.0);
    }

    #[test]
    fn match_kind_uses_kebab_case() {
        assert_eq!(
            serde_json::to_value(MatchKind::BpmFuzzy).expect("serializes"),
            "bpm-fuzzy"
        );
        assert_eq!(
            serde_json::to_value(MatchKind::Forced).expect("serializes"),
            "forced"
        );
    }

    #[test]
    fn unknown_bpm_is_omitted() {
        let file = VideoFile {
            name: "a.mp4".into(),
            path: "/videos/a.mp4".into(),
            bpm: 0.0,
        };
        let value = serde_json::to_value(&file).expect("serializes");
        assert!(value.get("bpm").is_none());
    }
}

//! Tiered track-to-video matching.
//!
//! The cascade, best first:
//!
//! 0. exact filename (case-insensitive, with extension)
//! 1. filename stem
//! 2. fuzzy filename (similarity ≥ 0.70)
//! 3. closest BPM + similarity ≥ 0.30
//! 4. closest BPM
//! 5. any video
//!
//! Ties at levels 3–5 are broken with a stable FNV-1a pick keyed by the
//! song name, so repeated calls for the same song return the same video
//! while different songs spread across the pool.

use std::hash::Hasher;
use std::path::Path;

use decksync_events::{MatchKind, VideoMatch};
use fnv::FnvHasher;
use rand::Rng;
use tracing::info;

use crate::index::{IndexedFile, LibraryIndex};

/// Match level constants, 0 = best.
pub const LEVEL_EXACT: u8 = 0;
pub const LEVEL_STEM: u8 = 1;
pub const LEVEL_FUZZY: u8 = 2;
pub const LEVEL_BPM_FUZZY: u8 = 3;
pub const LEVEL_BPM: u8 = 4;
pub const LEVEL_RANDOM: u8 = 5;

/// Level 2 minimum filename similarity.
const FUZZY_THRESHOLD: f64 = 0.70;
/// Level 3 minimum filename similarity.
const BPM_FUZZY_THRESHOLD: f64 = 0.30;
/// BPM tolerance for half-time detection.
const HALF_TIME_TOLERANCE: f64 = 3.0;

/// Ranked BPM candidates considered for the stable pick.
const TOP_CANDIDATES: usize = 5;

impl LibraryIndex {
    /// Find the best video match for a song using the tiered fallback.
    ///
    /// Returns `None` only when the index is empty. Also performs half-time
    /// BPM correction on the returned candidate.
    #[must_use]
    pub fn match_video(&self, song_filename: &str, deck_bpm: f64) -> Option<VideoMatch> {
        let indexed = self.entries_snapshot();
        if indexed.is_empty() {
            return None;
        }

        let song_lower = song_filename.trim().to_lowercase();
        let song_stem = Path::new(&song_lower)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        // Level 0: exact filename.
        for entry in &indexed {
            if entry.file.name.to_lowercase() == song_lower {
                return Some(self.finish(entry, LEVEL_EXACT, MatchKind::Exact, 1.0, deck_bpm));
            }
        }

        // Level 1: stem.
        if !song_stem.is_empty() {
            for entry in &indexed {
                if entry.stem == song_stem {
                    return Some(self.finish(entry, LEVEL_STEM, MatchKind::Stem, 1.0, deck_bpm));
                }
            }
        }

        // Level 2: fuzzy filename.
        let mut best_similarity = 0.0;
        let mut best: Option<&IndexedFile> = None;
        for entry in &indexed {
            let score = similarity(&song_stem, &entry.stem);
            if score >= FUZZY_THRESHOLD && score > best_similarity {
                best_similarity = score;
                best = Some(entry);
            }
        }
        if let Some(entry) = best {
            return Some(self.finish(
                entry,
                LEVEL_FUZZY,
                MatchKind::Fuzzy,
                best_similarity,
                deck_bpm,
            ));
        }

        // Level 3: closest BPM with minimal similarity. Rank by folded BPM
        // distance and pick stably among the top candidates.
        if deck_bpm > 0.0 {
            let mut candidates: Vec<(&IndexedFile, f64, f64)> = indexed
                .iter()
                .filter(|entry| entry.file.bpm > 0.0)
                .filter_map(|entry| {
                    let score = similarity(&song_stem, &entry.stem);
                    (score >= BPM_FUZZY_THRESHOLD)
                        .then(|| (entry, score, bpm_diff(deck_bpm, entry.file.bpm)))
                })
                .collect();
            if !candidates.is_empty() {
                candidates.sort_by(|a, b| {
                    a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal)
                });
                let top = candidates.len().min(TOP_CANDIDATES);
                let (entry, score, _) = candidates[stable_index(&song_lower, top)];
                return Some(self.finish(
                    entry,
                    LEVEL_BPM_FUZZY,
                    MatchKind::BpmFuzzy,
                    score,
                    deck_bpm,
                ));
            }
        }

        // Level 4: closest BPM.
        if deck_bpm > 0.0 {
            let mut candidates: Vec<(&IndexedFile, f64)> = indexed
                .iter()
                .filter(|entry| entry.file.bpm > 0.0)
                .map(|entry| (entry, bpm_diff(deck_bpm, entry.file.bpm)))
                .collect();
            if !candidates.is_empty() {
                candidates.sort_by(|a, b| {
                    a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)
                });
                let top = candidates.len().min(TOP_CANDIDATES);
                let (entry, _) = candidates[stable_index(&song_lower, top)];
                return Some(self.finish(entry, LEVEL_BPM, MatchKind::Bpm, 0.0, deck_bpm));
            }
        }

        // Level 5: any video, stable by song name.
        let entry = &indexed[stable_index(&song_lower, indexed.len())];
        Some(self.finish(entry, LEVEL_RANDOM, MatchKind::Random, 0.0, deck_bpm))
    }

    /// Pick a random video whose served path differs from `exclude_path`.
    /// When only one video exists it is returned anyway; `None` only for an
    /// empty index.
    #[must_use]
    pub fn random_excluding(&self, exclude_path: &str, deck_bpm: f64) -> Option<VideoMatch> {
        let indexed = self.entries_snapshot();
        if indexed.is_empty() {
            return None;
        }

        let candidates: Vec<&IndexedFile> = indexed
            .iter()
            .filter(|entry| entry.file.path != exclude_path)
            .collect();

        let entry = if candidates.is_empty() {
            &indexed[0]
        } else {
            candidates[rand::rng().random_range(0..candidates.len())]
        };
        Some(self.finish(entry, LEVEL_RANDOM, MatchKind::Random, 0.0, deck_bpm))
    }

    fn finish(
        &self,
        entry: &IndexedFile,
        level: u8,
        kind: MatchKind,
        similarity: f64,
        deck_bpm: f64,
    ) -> VideoMatch {
        let mut matched = VideoMatch {
            file: entry.file.clone(),
            level,
            kind,
            similarity,
        };
        self.correct_half_time(&mut matched, deck_bpm);
        matched
    }

    /// Detect a half-time false positive: if doubling the video's BPM lands
    /// strictly closer to the deck BPM and within tolerance, double the
    /// stored value and persist the correction. Applied at most once per
    /// video.
    fn correct_half_time(&self, matched: &mut VideoMatch, deck_bpm: f64) {
        if matched.file.bpm <= 0.0 || deck_bpm <= 0.0 {
            return;
        }
        {
            let mut corrected = self.corrected.lock().expect("corrected lock poisoned");
            if corrected.contains(&matched.file.path) {
                return;
            }
            let direct = (matched.file.bpm - deck_bpm).abs();
            let doubled = (matched.file.bpm * 2.0 - deck_bpm).abs();
            if !(doubled < direct && doubled <= HALF_TIME_TOLERANCE) {
                return;
            }
            corrected.insert(matched.file.path.clone());
        }
        let new_bpm = matched.file.bpm * 2.0;
        info!(
            video = matched.file.name,
            old = matched.file.bpm,
            new = new_bpm,
            deck_bpm,
            "half-time BPM detected"
        );
        matched.file.bpm = new_bpm;
        self.update_bpm(&matched.file.path, new_bpm);
    }
}

/// BPM distance accounting for half/double time:
/// `min(|a-b|, |a-2b|, |2a-b|)`.
#[must_use]
pub fn bpm_diff(a: f64, b: f64) -> f64 {
    let direct = (a - b).abs();
    let half = (a - 2.0 * b).abs();
    let double = (2.0 * a - b).abs();
    direct.min(half).min(double)
}

/// Deterministic index in `[0, n)` for a key. Replaces a PRNG so the same
/// song always picks the same video from a pool of ties.
fn stable_index(key: &str, n: usize) -> usize {
    let mut hasher = FnvHasher::default();
    hasher.write(key.as_bytes());
    (hasher.finish() % n as u64) as usize
}

/// 0–1 similarity between two strings: Levenshtein distance normalised by
/// the longer length.
#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let (len_a, len_b) = (a.len(), b.len());
    if len_a == 0 || len_b == 0 {
        return 0.0;
    }
    let distance = levenshtein(a.as_bytes(), b.as_bytes());
    1.0 - distance as f64 / len_a.max(len_b) as f64
}

/// Edit distance with a single reusable row.
fn levenshtein(a: &[u8], b: &[u8]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, &char_a) in a.iter().enumerate() {
        let mut previous = row[0];
        row[0] = i + 1;
        for (j, &char_b) in b.iter().enumerate() {
            let cost = usize::from(char_a != char_b);
            let value = (row[j] + 1).min(row[j + 1] + 1).min(previous + cost);
            previous = row[j + 1];
            row[j + 1] = value;
        }
    }
    row[b.len()]
}

/// Extract a BPM hint from a filename such as `track_128bpm.mp4` or
/// `Something - 97.5bpm.mp4`. Returns 0 when no hint is present.
#[must_use]
pub fn parse_bpm_from_name(name: &str) -> f64 {
    let lower = name.to_lowercase();
    let Some(index) = lower.find("bpm") else {
        return 0.0;
    };
    if index == 0 {
        return 0.0;
    }

    let bytes = lower.as_bytes();
    let mut start = index;
    while start > 0 {
        let byte = bytes[start - 1];
        if byte.is_ascii_digit() || byte == b'.' {
            start -= 1;
        } else {
            break;
        }
    }
    if start == index {
        return 0.0;
    }
    lower[start..index].parse::<f64>().unwrap_or(0.0)
}

//! Video library index, polling directory watcher, and the tiered
//! track-to-video matcher for DeckSync.
//!
//! Two [`LibraryIndex`] instances back a running system: one over the song
//! video directory and one over the transition video directory, each with
//! its own served-path prefix so URLs never collide.

mod index;
mod matcher;

pub use index::LibraryIndex;
pub use matcher::{
    bpm_diff, parse_bpm_from_name, similarity, LEVEL_BPM, LEVEL_BPM_FUZZY, LEVEL_EXACT,
    LEVEL_FUZZY, LEVEL_RANDOM, LEVEL_STEM,
};

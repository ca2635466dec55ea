//! Master-deck election as a pure function over the active-deck records.

use std::collections::HashMap;

/// Per-deck state queried when recomputing the master.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActiveDeckRecord {
    pub audible: bool,
    pub playing: bool,
    pub volume: f64,
    pub has_video: bool,
}

/// Elect the master deck: among decks that are simultaneously audible,
/// playing, and matched to a video, the one with the highest fader volume
/// wins. Ties resolve in favour of the incumbent to prevent oscillation,
/// and when no deck qualifies the incumbent stays master. `0` means no
/// master.
///
/// Decks are visited in ascending order so the outcome is deterministic
/// regardless of map layout.
#[must_use]
pub fn elect_master(records: &HashMap<i32, ActiveDeckRecord>, previous: i32) -> i32 {
    let mut decks: Vec<i32> = records.keys().copied().collect();
    decks.sort_unstable();

    let mut best = 0;
    let mut best_volume = -1.0;
    for deck in decks {
        let record = &records[&deck];
        if !(record.audible && record.playing && record.has_video) {
            continue;
        }
        if record.volume > best_volume || (record.volume == best_volume && deck == previous) {
            best_volume = record.volume;
            best = deck;
        }
    }

    if best == 0 {
        previous
    } else {
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(audible: bool, playing: bool, volume: f64, has_video: bool) -> ActiveDeckRecord {
        ActiveDeckRecord {
            audible,
            playing,
            volume,
            has_video,
        }
    }

    #[test]
    fn highest_volume_qualified_deck_wins() {
        let mut records = HashMap::new();
        records.insert(1, record(true, true, 0.5, true));
        records.insert(2, record(true, true, 0.9, true));
        assert_eq!(elect_master(&records, 0), 2);
    }

    #[test]
    fn unqualified_decks_are_skipped() {
        let mut records = HashMap::new();
        records.insert(1, record(false, true, 1.0, true));
        records.insert(2, record(true, false, 1.0, true));
        records.insert(3, record(true, true, 1.0, false));
        records.insert(4, record(true, true, 0.2, true));
        assert_eq!(elect_master(&records, 0), 4);
    }

    #[test]
    fn ties_favour_the_incumbent() {
        let mut records = HashMap::new();
        for deck in 1..=4 {
            records.insert(deck, record(true, true, 0.8, true));
        }
        assert_eq!(elect_master(&records, 4), 4);
        assert_eq!(elect_master(&records, 2), 2);
        // No incumbent among equals: lowest deck wins deterministically.
        assert_eq!(elect_master(&records, 0), 1);
    }

    #[test]
    fn incumbent_persists_when_nothing_qualifies() {
        let mut records = HashMap::new();
        records.insert(1, record(false, false, 0.0, true));
        assert_eq!(elect_master(&records, 2), 2);
        assert_eq!(elect_master(&records, 0), 0);
    }

    #[test]
    fn empty_records_keep_the_quiescent_state() {
        assert_eq!(elect_master(&HashMap::new(), 0), 0);
    }
}

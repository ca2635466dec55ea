//! In-memory video library index with polling directory reconciliation.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, UNIX_EPOCH};

use decksync_data::BpmCache;
use decksync_events::VideoFile;
use tracing::{debug, info, warn};

use crate::matcher::parse_bpm_from_name;

/// A video file with its pre-computed lowercase stem. Stems are computed
/// once during scan and reused across all match calls.
#[derive(Debug, Clone)]
pub(crate) struct IndexedFile {
    pub(crate) file: VideoFile,
    pub(crate) stem: String,
}

struct IndexState {
    dir: PathBuf,
    entries: Vec<IndexedFile>,
}

/// Indexes a directory of video files and matches tracks against them.
///
/// Two instances exist in a running system (song videos and transition
/// videos) with disjoint served-path prefixes. Reads during matching take
/// shared access; rescans briefly take exclusive access to swap the list.
pub struct LibraryIndex {
    path_prefix: String,
    bpm_cache: Option<BpmCache>,
    state: RwLock<IndexState>,
    /// Paths whose BPM has been half-time corrected; each video is
    /// corrected at most once so later decks cannot flip it back.
    pub(crate) corrected: Mutex<HashSet<String>>,
}

impl LibraryIndex {
    /// Create an empty index over `dir`. `path_prefix` is prepended to
    /// filenames in the served path (e.g. `/videos/`). Pass `None` for
    /// `bpm_cache` to skip audio analysis.
    #[must_use]
    pub fn new(
        dir: impl Into<PathBuf>,
        path_prefix: impl Into<String>,
        bpm_cache: Option<BpmCache>,
    ) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            bpm_cache,
            state: RwLock::new(IndexState {
                dir: dir.into(),
                entries: Vec::new(),
            }),
            corrected: Mutex::new(HashSet::new()),
        }
    }

    /// Current directory being indexed.
    ///
    /// # Panics
    ///
    /// Panics if the index lock has been poisoned.
    #[must_use]
    pub fn dir(&self) -> PathBuf {
        self.state.read().expect("index lock poisoned").dir.clone()
    }

    /// Re-point the index at a different directory. The watcher picks up
    /// the content difference on its next tick.
    ///
    /// # Panics
    ///
    /// Panics if the index lock has been poisoned.
    pub fn set_dir(&self, dir: impl Into<PathBuf>) {
        self.state.write().expect("index lock poisoned").dir = dir.into();
    }

    /// All indexed videos, sorted case-insensitively by filename.
    ///
    /// # Panics
    ///
    /// Panics if the index lock has been poisoned.
    #[must_use]
    pub fn list_all(&self) -> Vec<VideoFile> {
        let state = self.state.read().expect("index lock poisoned");
        state.entries.iter().map(|entry| entry.file.clone()).collect()
    }

    /// Look up a video by its served path.
    ///
    /// # Panics
    ///
    /// Panics if the index lock has been poisoned.
    #[must_use]
    pub fn get_by_path(&self, path: &str) -> Option<VideoFile> {
        let state = self.state.read().expect("index lock poisoned");
        state
            .entries
            .iter()
            .find(|entry| entry.file.path == path)
            .map(|entry| entry.file.clone())
    }

    pub(crate) fn entries_snapshot(&self) -> Vec<IndexedFile> {
        self.state
            .read()
            .expect("index lock poisoned")
            .entries
            .clone()
    }

    /// Re-read the directory and replace the index atomically. BPM per
    /// file: filename hint first, then cache, then audio analysis.
    pub async fn scan(&self) {
        let dir = self.dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "video scan failed");
                return;
            }
        };

        let mut indexed = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_video_file(&name) || entry.file_type().map_or(true, |kind| kind.is_dir()) {
                continue;
            }
            let mod_time = mod_time_secs(entry.metadata().ok());
            let bpm = self.resolve_bpm(&dir, &name, mod_time).await;
            indexed.push(self.indexed_file(name, bpm));
        }
        sort_entries(&mut indexed);

        let with_bpm = indexed.iter().filter(|entry| entry.file.bpm > 0.0).count();
        let count = indexed.len();
        {
            let mut state = self.state.write().expect("index lock poisoned");
            state.entries = indexed;
        }
        info!(count, with_bpm, "video scan complete");
    }

    /// Poll the directory at `interval` and reconcile incrementally,
    /// invoking `on_change` after each applied difference. Runs until the
    /// owning task is aborted.
    pub async fn watch<F, Fut>(&self, interval: Duration, on_change: F)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut previous = self.dir_snapshot().map(|(snap, _)| snap).unwrap_or_default();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            // Transient read failures are skipped and retried next tick.
            let Some((current, dir)) = self.dir_snapshot() else {
                continue;
            };
            if current != previous {
                self.apply_changes(&previous, &current, &dir).await;
                on_change().await;
                previous = current;
            }
        }
    }

    /// Update the in-memory BPM for a video and persist the value to the
    /// cache. Used by the half-time correction.
    ///
    /// # Panics
    ///
    /// Panics if the index lock has been poisoned.
    pub fn update_bpm(&self, served_path: &str, new_bpm: f64) {
        {
            let mut state = self.state.write().expect("index lock poisoned");
            if let Some(entry) = state
                .entries
                .iter_mut()
                .find(|entry| entry.file.path == served_path)
            {
                entry.file.bpm = new_bpm;
            }
        }

        let Some(cache) = self.bpm_cache.clone() else {
            return;
        };
        let Some(name) = Path::new(served_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
        else {
            return;
        };
        let abs = self.dir().join(&name);
        let Ok(metadata) = std::fs::metadata(&abs) else {
            return;
        };
        let mod_time = mod_time_secs(Some(metadata));
        let abs = abs.to_string_lossy().into_owned();
        tokio::spawn(async move {
            if let Err(err) = cache.set(&abs, mod_time, new_bpm).await {
                warn!(file = name, error = %err, "bpm cache write failed");
            } else {
                info!(file = name, bpm = new_bpm, "bpm corrected (half-time)");
            }
        });
    }

    fn indexed_file(&self, name: String, bpm: f64) -> IndexedFile {
        let stem = stem_of(&name);
        IndexedFile {
            file: VideoFile {
                path: format!("{}{}", self.path_prefix, name),
                name,
                bpm,
            },
            stem,
        }
    }

    async fn resolve_bpm(&self, dir: &Path, name: &str, mod_time: i64) -> f64 {
        let hinted = parse_bpm_from_name(name);
        if hinted > 0.0 {
            return hinted;
        }
        let Some(cache) = &self.bpm_cache else {
            return 0.0;
        };
        let abs = dir.join(name);
        let abs_str = abs.to_string_lossy().into_owned();

        match cache.get(&abs_str, mod_time).await {
            Ok(Some(cached)) => {
                debug!(file = name, bpm = cached, "bpm cache hit");
                return cached;
            }
            Ok(None) => {}
            Err(err) => warn!(file = name, error = %err, "bpm cache read failed"),
        }

        let detected = match tokio::task::spawn_blocking(move || {
            decksync_analysis::analyse_file(&abs)
        })
        .await
        {
            Ok(Ok(bpm)) => bpm,
            Ok(Err(err)) => {
                warn!(file = name, error = %err, "bpm analysis failed");
                return 0.0;
            }
            Err(err) => {
                warn!(file = name, error = %err, "bpm analysis task failed");
                return 0.0;
            }
        };

        if detected > 0.0 {
            if let Err(err) = cache.set(&abs_str, mod_time, detected).await {
                warn!(file = name, error = %err, "bpm cache write failed");
            }
            info!(file = name, bpm = detected, "bpm detected");
        }
        detected
    }

    /// Read the directory into a (name, mod-time) map. Returns `None` when
    /// the directory cannot be read.
    fn dir_snapshot(&self) -> Option<(BTreeMap<String, i64>, PathBuf)> {
        let dir = self.dir();
        let entries = std::fs::read_dir(&dir).ok()?;
        let mut snapshot = BTreeMap::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_video_file(&name) || entry.file_type().map_or(true, |kind| kind.is_dir()) {
                continue;
            }
            snapshot.insert(name, mod_time_secs(entry.metadata().ok()));
        }
        Some((snapshot, dir))
    }

    /// Incrementally update the list from a snapshot diff. Only new or
    /// modified files are analysed; deleted files are dropped.
    async fn apply_changes(
        &self,
        previous: &BTreeMap<String, i64>,
        current: &BTreeMap<String, i64>,
        dir: &Path,
    ) {
        let mut added = Vec::new();
        for (name, mod_time) in current {
            match previous.get(name) {
                None => {
                    info!(file = name, "video added");
                    added.push((name.clone(), *mod_time));
                }
                Some(old) if old != mod_time => {
                    info!(file = name, "video modified");
                    added.push((name.clone(), *mod_time));
                }
                Some(_) => {}
            }
        }
        let deleted: HashSet<&String> = previous
            .keys()
            .filter(|name| !current.contains_key(*name))
            .inspect(|name| info!(file = name.as_str(), "video deleted"))
            .collect();

        let mut replacements: BTreeMap<String, IndexedFile> = BTreeMap::new();
        for (name, mod_time) in &added {
            let bpm = self.resolve_bpm(dir, name, *mod_time).await;
            replacements.insert(name.clone(), self.indexed_file(name.clone(), bpm));
        }

        let added_count = added.len();
        let deleted_count = deleted.len();
        let total;
        {
            let mut state = self.state.write().expect("index lock poisoned");
            let mut result = Vec::with_capacity(state.entries.len());
            for entry in state.entries.drain(..) {
                if deleted.contains(&entry.file.name) {
                    continue;
                }
                match replacements.remove(&entry.file.name) {
                    Some(updated) => result.push(updated),
                    None => result.push(entry),
                }
            }
            result.extend(replacements.into_values());
            sort_entries(&mut result);
            total = result.len();
            state.entries = result;
        }
        info!(
            added = added_count,
            deleted = deleted_count,
            total,
            "incremental scan complete"
        );
    }
}

fn sort_entries(entries: &mut [IndexedFile]) {
    entries.sort_by(|a, b| {
        a.file
            .name
            .to_lowercase()
            .cmp(&b.file.name.to_lowercase())
    });
}

fn is_video_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"))
}

fn stem_of(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn mod_time_secs(metadata: Option<std::fs::Metadata>) -> i64 {
    metadata
        .and_then(|meta| meta.modified().ok())
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |duration| duration.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"not really a video").expect("write");
    }

    #[tokio::test]
    async fn scan_indexes_only_videos_sorted() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), "Zeta_128bpm.mp4");
        write_file(dir.path(), "alpha.mp4");
        write_file(dir.path(), "notes.txt");
        std::fs::create_dir(dir.path().join("sub.mp4")).expect("mkdir");

        let index = LibraryIndex::new(dir.path(), "/videos/", None);
        index.scan().await;

        let all = index.list_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "alpha.mp4");
        assert_eq!(all[1].name, "Zeta_128bpm.mp4");
        assert_eq!(all[1].bpm, 128.0);
        assert_eq!(all[1].path, "/videos/Zeta_128bpm.mp4");
    }

    #[tokio::test]
    async fn scanning_twice_without_changes_is_identical() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), "a.mp4");
        write_file(dir.path(), "b_90bpm.mp4");

        let index = LibraryIndex::new(dir.path(), "/videos/", None);
        index.scan().await;
        let first = index.list_all();
        index.scan().await;
        assert_eq!(index.list_all(), first);
    }

    #[tokio::test]
    async fn get_by_path_resolves_served_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), "a.mp4");
        let index = LibraryIndex::new(dir.path(), "/videos/", None);
        index.scan().await;

        assert!(index.get_by_path("/videos/a.mp4").is_some());
        assert!(index.get_by_path("/videos/missing.mp4").is_none());
    }

    #[tokio::test]
    async fn watch_applies_adds_and_deletes() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), "first.mp4");

        let index = std::sync::Arc::new(LibraryIndex::new(dir.path(), "/videos/", None));
        index.scan().await;

        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(8);
        let watcher = {
            let index = index.clone();
            tokio::spawn(async move {
                index
                    .watch(Duration::from_millis(20), move || {
                        let tx = tx.clone();
                        async move {
                            let _ = tx.send(()).await;
                        }
                    })
                    .await;
            })
        };

        // Yield so the watcher task takes its initial snapshot first.
        tokio::time::sleep(Duration::from_millis(50)).await;

        write_file(dir.path(), "second_100bpm.mp4");
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("change notification")
            .expect("channel open");
        let all = index.list_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].name, "second_100bpm.mp4");
        assert_eq!(all[1].bpm, 100.0);

        std::fs::remove_file(dir.path().join("first.mp4")).expect("remove");
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("change notification")
            .expect("channel open");
        let all = index.list_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "second_100bpm.mp4");

        watcher.abort();
    }

    #[tokio::test]
    async fn update_bpm_changes_indexed_value() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), "slow.mp4");
        let index = LibraryIndex::new(dir.path(), "/videos/", None);
        index.scan().await;

        index.update_bpm("/videos/slow.mp4", 130.0);
        assert_eq!(
            index.get_by_path("/videos/slow.mp4").expect("entry").bpm,
            130.0
        );
    }
}

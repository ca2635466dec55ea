//! Persistent cache of analysed BPM values, keyed by absolute path and
//! file modification time.

use std::path::Path;

use sqlx::sqlite::SqlitePool;
use tracing::{info, warn};

use crate::error::{DataError, Result};

/// Stores and retrieves analysed BPM values from the `video_bpm` table.
///
/// An entry is valid only while the file's modification time matches; a
/// mismatch behaves as a miss so the file is re-analysed.
#[derive(Clone)]
pub struct BpmCache {
    pool: SqlitePool,
}

impl BpmCache {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up a cached BPM for `path` at `mod_time`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get(&self, path: &str, mod_time: i64) -> Result<Option<f64>> {
        sqlx::query_scalar("SELECT bpm FROM video_bpm WHERE path = ? AND mod_time = ?")
            .bind(path)
            .bind(mod_time)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::query("bpm_cache.get"))
    }

    /// Store a BPM value for `path` at `mod_time`, replacing any prior entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn set(&self, path: &str, mod_time: i64, bpm: f64) -> Result<()> {
        sqlx::query(
            "INSERT INTO video_bpm (path, bpm, mod_time) VALUES (?, ?, ?)
             ON CONFLICT(path) DO UPDATE SET bpm = excluded.bpm, mod_time = excluded.mod_time",
        )
        .bind(path)
        .bind(bpm)
        .bind(mod_time)
        .execute(&self.pool)
        .await
        .map_err(DataError::query("bpm_cache.set"))?;
        Ok(())
    }

    /// Remove entries whose file no longer exists on disk. Returns the
    /// number of rows removed. Per-row failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the path listing query fails.
    pub async fn cleanup(&self) -> Result<usize> {
        let paths: Vec<(String,)> = sqlx::query_as("SELECT path FROM video_bpm")
            .fetch_all(&self.pool)
            .await
            .map_err(DataError::query("bpm_cache.cleanup"))?;

        let mut removed = 0;
        for (path,) in paths {
            if Path::new(&path).exists() {
                continue;
            }
            match sqlx::query("DELETE FROM video_bpm WHERE path = ?")
                .bind(&path)
                .execute(&self.pool)
                .await
            {
                Ok(_) => removed += 1,
                Err(err) => warn!(path, error = %err, "bpm cache cleanup delete failed"),
            }
        }

        if removed > 0 {
            info!(removed, "bpm cache cleanup");
        }
        Ok(removed)
    }
}

//! Durable key/value configuration with an in-memory read cache.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use crate::error::{DataError, Result};

/// A key-value pair as exchanged with clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
}

/// Thread-safe access to the settings stored in the `config` table.
///
/// Reads are served from an in-memory cache loaded at construction; writes
/// go through the database first and refresh the cache on success, so the
/// cache never gets ahead of durable state.
#[derive(Clone)]
pub struct ConfigStore {
    pool: SqlitePool,
    cache: Arc<RwLock<HashMap<String, String>>>,
}

impl ConfigStore {
    /// Load all settings and construct the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial load fails.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM config")
            .fetch_all(&pool)
            .await
            .map_err(DataError::query("config.load"))?;

        Ok(Self {
            pool,
            cache: Arc::new(RwLock::new(rows.into_iter().collect())),
        })
    }

    /// Return the value for `key`, or `fallback` when unset.
    ///
    /// # Panics
    ///
    /// Panics if the cache lock has been poisoned.
    #[must_use]
    pub fn get(&self, key: &str, fallback: &str) -> String {
        let cache = self.cache.read().expect("config cache lock poisoned");
        cache
            .get(key)
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Return a copy of every setting.
    ///
    /// # Panics
    ///
    /// Panics if the cache lock has been poisoned.
    #[must_use]
    pub fn all(&self) -> HashMap<String, String> {
        self.cache
            .read()
            .expect("config cache lock poisoned")
            .clone()
    }

    /// Persist a key-value pair; last write wins.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails. The cache is only refreshed
    /// after a successful write.
    ///
    /// # Panics
    ///
    /// Panics if the cache lock has been poisoned.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO config (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(DataError::query("config.set"))?;

        let mut cache = self.cache.write().expect("config cache lock poisoned");
        cache.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{open, open_in_memory};

    #[tokio::test]
    async fn get_falls_back_for_unknown_keys() {
        let pool = open_in_memory().await.expect("open");
        let config = ConfigStore::new(pool).await.expect("config");
        assert_eq!(config.get("missing", "fallback"), "fallback");
        assert_eq!(config.get("transition_duration", "9"), "3");
    }

    #[tokio::test]
    async fn set_updates_cache_and_database() {
        let pool = open_in_memory().await.expect("open");
        let config = ConfigStore::new(pool.clone()).await.expect("config");

        config.set("aspect_ratio", "16:9").await.expect("set");
        assert_eq!(config.get("aspect_ratio", ""), "16:9");

        config.set("aspect_ratio", "4:3").await.expect("overwrite");
        let (stored,): (String,) =
            sqlx::query_as("SELECT value FROM config WHERE key = 'aspect_ratio'")
                .fetch_one(&pool)
                .await
                .expect("row");
        assert_eq!(stored, "4:3", "last write wins");
    }

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("decksync.db");
        {
            let pool = open(&path).await.expect("open");
            let config = ConfigStore::new(pool).await.expect("config");
            config.set("loop_video", "/videos/a.mp4").await.expect("set");
        }
        let pool = open(&path).await.expect("reopen");
        let config = ConfigStore::new(pool).await.expect("config");
        assert_eq!(config.get("loop_video", ""), "/videos/a.mp4");
    }
}

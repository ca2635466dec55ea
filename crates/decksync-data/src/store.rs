//! Database bootstrap: connection options, pragmas, schema, and seed rows.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::effects::seed_effects;
use crate::error::{DataError, Result};
use crate::overlay::seed_elements;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS config (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

INSERT OR IGNORE INTO config (key, value) VALUES ('videos_dir', './videos');
INSERT OR IGNORE INTO config (key, value) VALUES ('transition_videos_dir', './transition-videos');
INSERT OR IGNORE INTO config (key, value) VALUES ('transition_duration', '3');
INSERT OR IGNORE INTO config (key, value) VALUES ('transition_enabled', '1');

CREATE TABLE IF NOT EXISTS video_bpm (
    path       TEXT PRIMARY KEY,
    bpm        REAL NOT NULL,
    mod_time   INTEGER NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS transition_effects (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL,
    direction  TEXT NOT NULL CHECK(direction IN ('in', 'out')),
    css        TEXT NOT NULL,
    enabled    INTEGER NOT NULL DEFAULT 1,
    is_seed    INTEGER NOT NULL DEFAULT 0,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_seed_effects
    ON transition_effects (name, direction, is_seed) WHERE is_seed = 1;

CREATE TABLE IF NOT EXISTS overlay_elements (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    key                  TEXT NOT NULL UNIQUE,
    name                 TEXT NOT NULL,
    enabled              INTEGER NOT NULL DEFAULT 1,
    css                  TEXT NOT NULL DEFAULT '',
    html                 TEXT NOT NULL DEFAULT '',
    js                   TEXT NOT NULL DEFAULT '',
    is_seed              INTEGER NOT NULL DEFAULT 0,
    data_type            TEXT NOT NULL DEFAULT 'verb',
    verb                 TEXT NOT NULL DEFAULT '',
    config               TEXT NOT NULL DEFAULT '{}',
    show_over_transition INTEGER NOT NULL DEFAULT 0,
    created_at           DATETIME DEFAULT CURRENT_TIMESTAMP
);
";

/// Open (creating if necessary) the single-file store and ensure the schema
/// and seed rows exist.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or the schema cannot be
/// applied.
pub async fn open(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(DataError::query("store.open"))?;

    apply_schema(&pool).await?;
    Ok(pool)
}

/// Open an in-memory store, used by tests.
///
/// # Errors
///
/// Returns an error if the schema cannot be applied.
pub async fn open_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(":memory:")
        .journal_mode(SqliteJournalMode::Memory);

    // A single pinned connection: each SQLite connection gets its own
    // private in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(DataError::query("store.open_in_memory"))?;

    apply_schema(&pool).await?;
    Ok(pool)
}

async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(DataError::query("store.schema"))?;
    seed_effects(pool).await?;
    seed_elements(pool).await?;
    Ok(())
}

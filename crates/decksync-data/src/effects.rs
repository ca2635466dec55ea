//! CRUD for the transition CSS effect library.
//!
//! Seeded built-in effects are reinserted on startup when absent and can be
//! disabled but never deleted. Enabled effects are mirrored into memory so
//! the transition hot path can pick one without touching the database.

use std::sync::{Arc, RwLock};

use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::error::{DataError, Result};

/// Whether an effect animates the incoming or outgoing video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in" => Some(Self::In),
            "out" => Some(Self::Out),
            _ => None,
        }
    }
}

/// A CSS transition effect applied by clients during a master handover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEffect {
    pub id: i64,
    pub name: String,
    pub direction: Direction,
    pub css: String,
    pub enabled: bool,
    pub is_seed: bool,
}

const SELECT_COLUMNS: &str = "SELECT id, name, direction, css, enabled, is_seed";

/// Store for transition effects with an in-memory mirror of enabled rows.
#[derive(Clone)]
pub struct EffectStore {
    pool: SqlitePool,
    enabled: Arc<RwLock<Vec<TransitionEffect>>>,
}

impl EffectStore {
    /// Construct the store and load the enabled-effect mirror.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial load fails.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self {
            pool,
            enabled: Arc::new(RwLock::new(Vec::new())),
        };
        store.refresh_enabled().await?;
        Ok(store)
    }

    /// List effects, optionally filtered by direction, seeds first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list(&self, direction: Option<Direction>) -> Result<Vec<TransitionEffect>> {
        let rows = match direction {
            Some(direction) => {
                sqlx::query(&format!(
                    "{SELECT_COLUMNS} FROM transition_effects WHERE direction = ? \
                     ORDER BY is_seed DESC, id"
                ))
                .bind(direction.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "{SELECT_COLUMNS} FROM transition_effects ORDER BY is_seed DESC, id"
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(DataError::query("effects.list"))?;

        rows.iter().map(row_to_effect).collect()
    }

    /// Fetch a single effect.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::NotFound`] if the id does not exist.
    pub async fn get(&self, id: i64) -> Result<TransitionEffect> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} FROM transition_effects WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::query("effects.get"))?
        .ok_or(DataError::NotFound { entity: "effect" })?;
        row_to_effect(&row)
    }

    /// Insert a new user effect and return the created record.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create(
        &self,
        name: &str,
        direction: Direction,
        css: &str,
    ) -> Result<TransitionEffect> {
        let result = sqlx::query(
            "INSERT INTO transition_effects (name, direction, css, enabled, is_seed) \
             VALUES (?, ?, ?, 1, 0)",
        )
        .bind(name)
        .bind(direction.as_str())
        .bind(css)
        .execute(&self.pool)
        .await
        .map_err(DataError::query("effects.create"))?;

        self.refresh_enabled().await?;
        Ok(TransitionEffect {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            direction,
            css: css.to_string(),
            enabled: true,
            is_seed: false,
        })
    }

    /// Update name, direction, and CSS of an existing effect.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update(&self, id: i64, name: &str, direction: Direction, css: &str) -> Result<()> {
        sqlx::query("UPDATE transition_effects SET name = ?, direction = ?, css = ? WHERE id = ?")
            .bind(name)
            .bind(direction.as_str())
            .bind(css)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DataError::query("effects.update"))?;
        self.refresh_enabled().await
    }

    /// Toggle the enabled flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE transition_effects SET enabled = ? WHERE id = ?")
            .bind(i64::from(enabled))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DataError::query("effects.set_enabled"))?;
        self.refresh_enabled().await
    }

    /// Delete a user effect.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::SeedProtected`] for built-in effects and
    /// [`DataError::NotFound`] for unknown ids.
    pub async fn delete(&self, id: i64) -> Result<()> {
        let is_seed: Option<bool> =
            sqlx::query_scalar("SELECT is_seed FROM transition_effects WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DataError::query("effects.delete"))?;

        match is_seed {
            None => return Err(DataError::NotFound { entity: "effect" }),
            Some(true) => return Err(DataError::SeedProtected),
            Some(false) => {}
        }

        sqlx::query("DELETE FROM transition_effects WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DataError::query("effects.delete"))?;
        self.refresh_enabled().await
    }

    /// Pick a random enabled effect for the given direction from the
    /// in-memory mirror. Returns `None` when no enabled effect exists.
    ///
    /// # Panics
    ///
    /// Panics if the mirror lock has been poisoned.
    #[must_use]
    pub fn random_enabled(&self, direction: Direction) -> Option<TransitionEffect> {
        let enabled = self.enabled.read().expect("effect mirror lock poisoned");
        let candidates: Vec<&TransitionEffect> = enabled
            .iter()
            .filter(|effect| effect.direction == direction)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let pick = rand::rng().random_range(0..candidates.len());
        Some(candidates[pick].clone())
    }

    async fn refresh_enabled(&self) -> Result<()> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} FROM transition_effects WHERE enabled = 1 ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::query("effects.refresh"))?;

        let effects = rows
            .iter()
            .map(row_to_effect)
            .collect::<Result<Vec<_>>>()?;
        let mut enabled = self.enabled.write().expect("effect mirror lock poisoned");
        *enabled = effects;
        Ok(())
    }
}

fn row_to_effect(row: &sqlx::sqlite::SqliteRow) -> Result<TransitionEffect> {
    let direction: String = row.get("direction");
    Ok(TransitionEffect {
        id: row.get("id"),
        name: row.get("name"),
        direction: Direction::parse(&direction).ok_or(DataError::NotFound {
            entity: "effect direction",
        })?,
        css: row.get("css"),
        enabled: row.get("enabled"),
        is_seed: row.get("is_seed"),
    })
}

/// Built-in effect seeds, reinserted on startup when absent.
const EFFECT_SEEDS: &[(&str, &str, &str)] = &[
    (
        "Fade",
        "in",
        "@keyframes transition-fade-in {\n  0%   { opacity: 0; }\n  100% { opacity: 1; }\n}\n.transition-active {\n  animation: transition-fade-in var(--transition-duration) ease-in forwards;\n}",
    ),
    (
        "Fade",
        "out",
        "@keyframes transition-fade-out {\n  0%   { opacity: 1; }\n  100% { opacity: 0; }\n}\n.transition-active {\n  animation: transition-fade-out var(--transition-duration) ease-out forwards;\n}",
    ),
    (
        "Dissolve",
        "in",
        "@keyframes transition-dissolve-in {\n  0%   { opacity: 0; filter: blur(12px) brightness(1.3); }\n  60%  { opacity: 0.8; filter: blur(4px) brightness(1.1); }\n  100% { opacity: 1; filter: blur(0) brightness(1); }\n}\n.transition-active {\n  animation: transition-dissolve-in var(--transition-duration) ease-in-out forwards;\n}",
    ),
    (
        "Dissolve",
        "out",
        "@keyframes transition-dissolve-out {\n  0%   { opacity: 1; filter: blur(0) brightness(1); }\n  40%  { opacity: 0.8; filter: blur(4px) brightness(1.1); }\n  100% { opacity: 0; filter: blur(12px) brightness(1.3); }\n}\n.transition-active {\n  animation: transition-dissolve-out var(--transition-duration) ease-in-out forwards;\n}",
    ),
    (
        "Flash",
        "in",
        "@keyframes transition-flash-in {\n  0%   { opacity: 0; filter: brightness(1); }\n  40%  { opacity: 1; filter: brightness(3); }\n  100% { opacity: 1; filter: brightness(1); }\n}\n.transition-active {\n  animation: transition-flash-in var(--transition-duration) ease-out forwards;\n}",
    ),
    (
        "Flash",
        "out",
        "@keyframes transition-flash-out {\n  0%   { opacity: 1; filter: brightness(1); }\n  60%  { opacity: 1; filter: brightness(3); }\n  100% { opacity: 0; filter: brightness(1); }\n}\n.transition-active {\n  animation: transition-flash-out var(--transition-duration) ease-in forwards;\n}",
    ),
    (
        "Zoom",
        "in",
        "@keyframes transition-zoom-in {\n  0%   { opacity: 0; transform: scale(0.8); }\n  100% { opacity: 1; transform: scale(1); }\n}\n.transition-active {\n  animation: transition-zoom-in var(--transition-duration) ease-out forwards;\n}",
    ),
    (
        "Zoom",
        "out",
        "@keyframes transition-zoom-out {\n  0%   { opacity: 1; transform: scale(1); }\n  100% { opacity: 0; transform: scale(1.3); }\n}\n.transition-active {\n  animation: transition-zoom-out var(--transition-duration) ease-in forwards;\n}",
    ),
    (
        "Iris",
        "in",
        "@keyframes transition-iris-in {\n  0%   { clip-path: circle(0% at 50% 50%); }\n  100% { clip-path: circle(72% at 50% 50%); }\n}\n.transition-active {\n  animation: transition-iris-in var(--transition-duration) ease-in-out forwards;\n}",
    ),
    (
        "Iris",
        "out",
        "@keyframes transition-iris-out {\n  0%   { clip-path: circle(72% at 50% 50%); }\n  100% { clip-path: circle(0% at 50% 50%); }\n}\n.transition-active {\n  animation: transition-iris-out var(--transition-duration) ease-in-out forwards;\n}",
    ),
    (
        "Glitch",
        "in",
        "@keyframes transition-glitch-in {\n  0%   { opacity: 0; clip-path: inset(40% 0 40% 0); filter: hue-rotate(0deg) saturate(1); }\n  10%  { opacity: 1; clip-path: inset(10% 0 80% 0); filter: hue-rotate(90deg) saturate(3); transform: translate(-3px, 2px); }\n  20%  { clip-path: inset(60% 0 5% 0); filter: hue-rotate(180deg) saturate(2); transform: translate(3px, -1px); }\n  30%  { clip-path: inset(20% 0 50% 0); filter: hue-rotate(270deg) saturate(4); transform: translate(-2px, 1px); }\n  50%  { clip-path: inset(5% 0 30% 0); filter: hue-rotate(45deg) saturate(2); transform: translate(1px, -2px); }\n  70%  { clip-path: inset(0 0 10% 0); filter: hue-rotate(0deg) saturate(1.5); transform: translate(-1px, 0); }\n  100% { opacity: 1; clip-path: inset(0 0 0 0); filter: hue-rotate(0deg) saturate(1); transform: translate(0, 0); }\n}\n.transition-active {\n  animation: transition-glitch-in var(--transition-duration) steps(1, end) forwards;\n}",
    ),
    (
        "Glitch",
        "out",
        "@keyframes transition-glitch-out {\n  0%   { opacity: 1; clip-path: inset(0 0 0 0); filter: hue-rotate(0deg) saturate(1); transform: translate(0, 0); }\n  30%  { clip-path: inset(0 0 10% 0); filter: hue-rotate(0deg) saturate(1.5); transform: translate(1px, 0); }\n  50%  { clip-path: inset(5% 0 30% 0); filter: hue-rotate(45deg) saturate(2); transform: translate(-1px, 2px); }\n  70%  { clip-path: inset(20% 0 50% 0); filter: hue-rotate(270deg) saturate(4); transform: translate(2px, -1px); }\n  80%  { clip-path: inset(60% 0 5% 0); filter: hue-rotate(180deg) saturate(2); transform: translate(-3px, 1px); }\n  90%  { clip-path: inset(10% 0 80% 0); filter: hue-rotate(90deg) saturate(3); transform: translate(3px, -2px); }\n  100% { opacity: 0; clip-path: inset(40% 0 40% 0); filter: hue-rotate(0deg) saturate(1); transform: translate(0, 0); }\n}\n.transition-active {\n  animation: transition-glitch-out var(--transition-duration) steps(1, end) forwards;\n}",
    ),
];

/// Insert any missing built-in effects. Idempotent via the partial unique
/// index on (name, direction, is_seed).
pub(crate) async fn seed_effects(pool: &SqlitePool) -> Result<()> {
    for (name, direction, css) in EFFECT_SEEDS {
        sqlx::query(
            "INSERT OR IGNORE INTO transition_effects (name, direction, css, enabled, is_seed) \
             VALUES (?, ?, ?, 1, 1)",
        )
        .bind(name)
        .bind(direction)
        .bind(css)
        .execute(pool)
        .await
        .map_err(DataError::query("effects.seed"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory;

    #[tokio::test]
    async fn seeds_cover_both_directions() {
        let store = EffectStore::new(open_in_memory().await.expect("open"))
            .await
            .expect("store");
        let ins = store.list(Some(Direction::In)).await.expect("list in");
        let outs = store.list(Some(Direction::Out)).await.expect("list out");
        assert_eq!(ins.len(), 6);
        assert_eq!(outs.len(), 6);
        assert!(ins.iter().all(|effect| effect.is_seed && effect.enabled));
    }

    #[tokio::test]
    async fn random_enabled_respects_direction_and_toggle() {
        let store = EffectStore::new(open_in_memory().await.expect("open"))
            .await
            .expect("store");

        let picked = store.random_enabled(Direction::In).expect("an in effect");
        assert_eq!(picked.direction, Direction::In);

        // Disable every "out" effect; the pick must dry up.
        for effect in store.list(Some(Direction::Out)).await.expect("list") {
            store.set_enabled(effect.id, false).await.expect("disable");
        }
        assert!(store.random_enabled(Direction::Out).is_none());
        assert!(store.random_enabled(Direction::In).is_some());
    }

    #[tokio::test]
    async fn seed_effects_cannot_be_deleted() {
        let store = EffectStore::new(open_in_memory().await.expect("open"))
            .await
            .expect("store");
        let seed = &store.list(Some(Direction::In)).await.expect("list")[0];
        let result = store.delete(seed.id).await;
        assert!(matches!(result, Err(DataError::SeedProtected)));
    }

    #[tokio::test]
    async fn user_effects_round_trip() {
        let store = EffectStore::new(open_in_memory().await.expect("open"))
            .await
            .expect("store");

        let created = store
            .create("Wipe", Direction::In, ".transition-active { opacity: 1; }")
            .await
            .expect("create");
        assert!(!created.is_seed);

        store
            .update(created.id, "Wipe Left", Direction::In, ".x{}")
            .await
            .expect("update");
        let fetched = store.get(created.id).await.expect("get");
        assert_eq!(fetched.name, "Wipe Left");

        store.delete(created.id).await.expect("delete");
        assert!(matches!(
            store.get(created.id).await,
            Err(DataError::NotFound { .. })
        ));
    }
}

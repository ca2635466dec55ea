//! CRUD for the overlay element library.
//!
//! Overlay elements are small CSS/HTML/JS fragments rendered by the player
//! on top of the video. Seeded elements cover the common console readouts
//! (progress, title, artist, BPM) plus a free-form text slot and a masked
//! logo image; they can be edited and disabled, restored to their
//! defaults, but never deleted.

use decksync_events::OverlayElement;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::error::{DataError, Result};

const SELECT_COLUMNS: &str = "SELECT id, key, name, enabled, css, html, js, is_seed, data_type, \
                              verb, config, show_over_transition";

/// Store for overlay elements.
#[derive(Clone)]
pub struct OverlayStore {
    pool: SqlitePool,
}

impl OverlayStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// List every overlay element, seeds first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list(&self) -> Result<Vec<OverlayElement>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} FROM overlay_elements ORDER BY is_seed DESC, id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::query("overlay.list"))?;
        Ok(rows.iter().map(row_to_element).collect())
    }

    /// Fetch a single element.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::NotFound`] if the id does not exist.
    pub async fn get(&self, id: i64) -> Result<OverlayElement> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} FROM overlay_elements WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::query("overlay.get"))?
        .ok_or(DataError::NotFound {
            entity: "overlay element",
        })?;
        Ok(row_to_element(&row))
    }

    /// Update the editable fields of an element.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update(
        &self,
        id: i64,
        name: &str,
        css: &str,
        html: &str,
        js: &str,
        config: &str,
        show_over_transition: bool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE overlay_elements SET name = ?, css = ?, html = ?, js = ?, config = ?, \
             show_over_transition = ? WHERE id = ?",
        )
        .bind(name)
        .bind(css)
        .bind(html)
        .bind(js)
        .bind(config)
        .bind(i64::from(show_over_transition))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DataError::query("overlay.update"))?;
        Ok(())
    }

    /// Toggle the enabled flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE overlay_elements SET enabled = ? WHERE id = ?")
            .bind(i64::from(enabled))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DataError::query("overlay.set_enabled"))?;
        Ok(())
    }

    /// Reset a seeded element to its shipped CSS/HTML/JS/config and
    /// re-enable it. Returns the refreshed element.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::SeedProtected`] when invoked on a user element
    /// and [`DataError::NotFound`] for unknown ids.
    pub async fn restore_defaults(&self, id: i64) -> Result<OverlayElement> {
        let element = self.get(id).await?;
        if !element.is_seed {
            return Err(DataError::SeedProtected);
        }
        let seed = ELEMENT_SEEDS
            .iter()
            .find(|seed| seed.key == element.key)
            .ok_or(DataError::NotFound {
                entity: "overlay seed",
            })?;

        sqlx::query(
            "UPDATE overlay_elements SET name = ?, css = ?, html = ?, js = ?, config = ?, \
             enabled = 1, show_over_transition = ? WHERE id = ?",
        )
        .bind(seed.name)
        .bind(seed.css)
        .bind(seed.html)
        .bind(seed.js)
        .bind(seed.config)
        .bind(i64::from(seed.show_over_transition))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DataError::query("overlay.restore"))?;

        self.get(id).await
    }

    /// Delete a user element.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::SeedProtected`] for built-in elements and
    /// [`DataError::NotFound`] for unknown ids.
    pub async fn delete(&self, id: i64) -> Result<()> {
        let element = self.get(id).await?;
        if element.is_seed {
            return Err(DataError::SeedProtected);
        }
        sqlx::query("DELETE FROM overlay_elements WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DataError::query("overlay.delete"))?;
        Ok(())
    }
}

fn row_to_element(row: &sqlx::sqlite::SqliteRow) -> OverlayElement {
    OverlayElement {
        id: row.get("id"),
        key: row.get("key"),
        name: row.get("name"),
        enabled: row.get("enabled"),
        css: row.get("css"),
        html: row.get("html"),
        js: row.get("js"),
        is_seed: row.get("is_seed"),
        data_type: row.get("data_type"),
        verb: row.get("verb"),
        config: row.get("config"),
        show_over_transition: row.get("show_over_transition"),
    }
}

struct ElementSeed {
    key: &'static str,
    name: &'static str,
    data_type: &'static str,
    verb: &'static str,
    config: &'static str,
    show_over_transition: bool,
    css: &'static str,
    html: &'static str,
    js: &'static str,
}

const ELEMENT_SEEDS: &[ElementSeed] = &[
    ElementSeed {
        key: "progress",
        name: "Progress Bar",
        data_type: "verb",
        verb: "get_time",
        config: "{}",
        show_over_transition: false,
        css: ".overlay-progress {\n  position: absolute;\n  bottom: 0;\n  left: 0;\n  width: 100%;\n  height: 8px;\n  pointer-events: none;\n}\n.overlay-progress-fill {\n  width: 0;\n  height: 100%;\n  background: linear-gradient(90deg, #6366f1, #ec4899);\n  transition: width 0.3s linear;\n}",
        html: "<div class=\"overlay-progress\">\n  <div class=\"overlay-progress-fill\" data-overlay-fill></div>\n</div>",
        js: "(function(el, deck) {\n  var fill = el.querySelector('[data-overlay-fill]');\n  if (!fill || !deck || !deck.totalTimeMs) return;\n  fill.style.width = (100 * (deck.elapsedMs || 0) / deck.totalTimeMs) + '%';\n})",
    },
    ElementSeed {
        key: "song_name",
        name: "Song Title",
        data_type: "verb",
        verb: "get_title",
        config: "{}",
        show_over_transition: true,
        css: ".overlay-title {\n  position: absolute;\n  top: 24px;\n  left: 24px;\n  color: #fff;\n  font-size: 28px;\n  font-weight: 600;\n  text-shadow: 0 2px 8px rgba(0,0,0,0.7);\n}",
        html: "<div class=\"overlay-title\">{{value}}</div>",
        js: "(function(el, deck) {\n  var node = el.querySelector('.overlay-title');\n  if (node) node.textContent = (deck && deck.title) || '';\n})",
    },
    ElementSeed {
        key: "artist",
        name: "Artist",
        data_type: "verb",
        verb: "get_artist",
        config: "{}",
        show_over_transition: true,
        css: ".overlay-artist {\n  position: absolute;\n  top: 62px;\n  left: 24px;\n  color: #cbd5e1;\n  font-size: 20px;\n  text-shadow: 0 2px 8px rgba(0,0,0,0.7);\n}",
        html: "<div class=\"overlay-artist\">{{value}}</div>",
        js: "(function(el, deck) {\n  var node = el.querySelector('.overlay-artist');\n  if (node) node.textContent = (deck && deck.artist) || '';\n})",
    },
    ElementSeed {
        key: "bpm",
        name: "BPM Readout",
        data_type: "verb",
        verb: "get_bpm",
        config: "{}",
        show_over_transition: false,
        css: ".overlay-bpm {\n  position: absolute;\n  top: 24px;\n  right: 24px;\n  color: #fff;\n  font-size: 24px;\n  font-variant-numeric: tabular-nums;\n  text-shadow: 0 2px 8px rgba(0,0,0,0.7);\n}",
        html: "<div class=\"overlay-bpm\">{{value}}</div>",
        js: "(function(el, deck) {\n  var node = el.querySelector('.overlay-bpm');\n  if (node) node.textContent = deck && deck.bpm ? deck.bpm.toFixed(1) + ' BPM' : '';\n})",
    },
    ElementSeed {
        key: "custom_text",
        name: "Custom Text",
        data_type: "custom",
        verb: "",
        config: "{\"text\":\"\"}",
        show_over_transition: true,
        css: ".overlay-custom {\n  position: absolute;\n  bottom: 32px;\n  right: 24px;\n  color: #fff;\n  font-size: 20px;\n  text-shadow: 0 2px 8px rgba(0,0,0,0.7);\n}",
        html: "<div class=\"overlay-custom\">{{value}}</div>",
        js: "(function(el, deck, config) {\n  var node = el.querySelector('.overlay-custom');\n  if (node) node.textContent = (config && config.text) || '';\n})",
    },
    ElementSeed {
        key: "custom_logo",
        name: "Custom Logo",
        data_type: "custom",
        verb: "",
        config: "{\"logo_url\":\"\"}",
        show_over_transition: true,
        css: ".overlay-logo {\n  position: absolute;\n  top: 40px;\n  left: 40px;\n  pointer-events: none;\n}\n.overlay-logo-wrap {\n  position: relative;\n  display: inline-block;\n  -webkit-mask-size: contain;\n  mask-size: contain;\n  -webkit-mask-repeat: no-repeat;\n  mask-repeat: no-repeat;\n  -webkit-mask-position: center;\n  mask-position: center;\n}\n.overlay-logo-img {\n  width: 200px;\n  height: auto;\n  display: block;\n}\n.overlay-logo-wrap::after {\n  content: '';\n  position: absolute;\n  top: 0;\n  left: -60%;\n  width: 60%;\n  height: 100%;\n  background: linear-gradient(90deg, transparent, rgba(255,255,255,0.35), transparent);\n  animation: overlay-logo-sweep 4s ease-in-out infinite;\n  pointer-events: none;\n}\n@keyframes overlay-logo-sweep {\n  0%   { left: -60%; }\n  50%  { left: 100%; }\n  100% { left: 100%; }\n}",
        html: "<div class=\"overlay-logo\">\n  <div class=\"overlay-logo-wrap\">\n    <img class=\"overlay-logo-img\" data-overlay-logo src=\"\" alt=\"\" />\n  </div>\n</div>",
        js: "(function(el, deck, config) {\n  var img = el.querySelector('[data-overlay-logo]');\n  if (!img) return;\n  var url = (config && config.logo_url) || '';\n  if (!url) { img.style.display = 'none'; return; }\n  img.style.display = '';\n  if (img.getAttribute('src') !== url) img.src = url;\n  var wrap = el.querySelector('.overlay-logo-wrap');\n  if (wrap) {\n    wrap.style.webkitMaskImage = 'url(' + url + ')';\n    wrap.style.maskImage = 'url(' + url + ')';\n  }\n})",
    },
];

/// Insert any missing built-in elements. Idempotent via the unique key
/// column; seeds ship disabled except the progress bar.
pub(crate) async fn seed_elements(pool: &SqlitePool) -> Result<()> {
    for seed in ELEMENT_SEEDS {
        let enabled = i64::from(seed.key == "progress");
        sqlx::query(
            "INSERT OR IGNORE INTO overlay_elements \
             (key, name, enabled, css, html, js, is_seed, data_type, verb, config, \
              show_over_transition) \
             VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)",
        )
        .bind(seed.key)
        .bind(seed.name)
        .bind(enabled)
        .bind(seed.css)
        .bind(seed.html)
        .bind(seed.js)
        .bind(seed.data_type)
        .bind(seed.verb)
        .bind(seed.config)
        .bind(i64::from(seed.show_over_transition))
        .execute(pool)
        .await
        .map_err(DataError::query("overlay.seed"))?;
    }
    Ok(())
}

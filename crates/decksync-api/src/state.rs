//! Shared application state threaded through every handler.

use std::sync::Arc;

use decksync_data::{ConfigStore, EffectStore, OverlayStore};
use decksync_engine::Engine;
use decksync_events::EventBus;
use tokio::sync::Notify;

/// Dependencies shared by the HTTP surface.
pub struct ApiState {
    pub engine: Engine,
    pub bus: EventBus,
    pub config: ConfigStore,
    pub effects: EffectStore,
    pub overlays: OverlayStore,
    /// Signalled by `POST /api/shutdown` to begin graceful termination.
    pub shutdown: Arc<Notify>,
}

impl ApiState {
    #[must_use]
    pub fn new(
        engine: Engine,
        config: ConfigStore,
        effects: EffectStore,
        overlays: OverlayStore,
    ) -> Self {
        let bus = engine.bus().clone();
        Self {
            engine,
            bus,
            config,
            effects,
            overlays,
            shutdown: Arc::new(Notify::new()),
        }
    }
}

//! HTTP and SSE surface for the DeckSync coordination server.
//!
//! The API is deliberately open: the server is LAN-only and the probe and
//! browsers are trusted collaborators. Handlers translate between the wire
//! contracts and the engine, and every error maps to a status code in
//! [`http::errors`].

pub mod http;
pub mod state;

pub use http::router::ApiServer;
pub use state::ApiState;

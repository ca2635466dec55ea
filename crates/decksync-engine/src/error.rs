//! Error types for the coordination core.

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by engine operations, mapped to HTTP statuses at the API
/// boundary.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Force-on-master was invoked while no master deck exists.
    #[error("no active deck")]
    NoMaster,
    /// The referenced path is not in the library index.
    #[error("video not found")]
    VideoNotFound,
    /// The targeted deck has never reported a sample.
    #[error("deck has no state")]
    NoDeckState,
    /// The library holds no videos at all.
    #[error("no videos available")]
    NoVideos,
    /// Deck number outside the supported 1..=4 range.
    #[error("deck out of range")]
    DeckOutOfRange,
}

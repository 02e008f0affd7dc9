use thiserror::Error;

/// Crate-level error type for the fallible seams: configuration, the durable
/// store and the backend transport. Stream-level failures inside a playback
/// session are not surfaced through here; they feed the engine's recovery
/// policy instead (see `player::media::StreamErrorKind`).
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] std::io::Error),

    #[error("store document corrupt: {0}")]
    StoreCorrupt(#[from] serde_json::Error),

    #[error("backend request failed: {0}")]
    Backend(#[from] reqwest::Error),

    #[error("no playable streams for {0}")]
    NoStreams(String),
}

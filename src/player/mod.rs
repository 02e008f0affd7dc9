pub mod context;
pub mod engine;
pub mod media;
pub mod state;

pub use context::PlayerContext;
pub use engine::PlaybackEngine;
pub use media::{
    AdaptiveFactory, AdaptiveSession, MediaEvent, MediaSink, QualityLevel, StreamError,
    StreamErrorKind, UrlRewriter,
};
pub use state::PlaybackState;

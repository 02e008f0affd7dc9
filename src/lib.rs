//! Headless playback core for the Nautilus streaming aggregator.
//!
//! The crate turns a `(media id, kind, season?, episode?)` request into
//! resilient playback: it races a fast single-provider lookup against a full
//! multi-provider scan, keeps an ordered fallback list of everything found,
//! and drives one media output through loading, quality selection, caption
//! sync and automatic candidate failover. The rendering surface stays
//! outside: embedders implement [`player::MediaSink`] and
//! [`player::AdaptiveFactory`] over whatever actually plays frames and
//! consume the [`api::PlayerEvent`] stream.

pub mod api;
pub mod common;
pub mod configs;
pub mod hunter;
pub mod player;
pub mod proxy;
pub mod session;
pub mod storage;
pub mod subtitles;

pub use api::{BackendClient, PlayerEvent};
pub use common::{MediaId, MediaKind, PlaybackSessionId, PlayerError};
pub use configs::Config;
pub use hunter::{CandidateList, StreamDescriptor, StreamHunter, StreamRequest, StreamSource};
pub use player::{
    AdaptiveFactory, AdaptiveSession, MediaEvent, MediaSink, PlaybackEngine, PlaybackState,
};
pub use proxy::ProxyAdapter;
pub use session::{PlaybackSession, SessionDeps, SessionHandles};
pub use storage::{JsonFileStore, KvStore, MemoryStore, PlayerPrefs, ProgressRecord};
pub use subtitles::{Cue, parse};

use serde::Serialize;

use crate::player::state::PlaybackState;

/// Events emitted by a playback session for the UI surface to render.
///
/// The core never renders anything itself; everything the reference UI shows
/// (per-provider scan status, the source badge, progress bars, stacked
/// subtitle lines, terminal error text) is derived from this stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlayerEvent {
    /// One provider of the scan roster reported in: a candidate was found or
    /// the provider came up empty/failed. Individual failures are non-fatal.
    #[serde(rename = "ProviderStatusEvent")]
    #[serde(rename_all = "camelCase")]
    ProviderStatus { source: String, found: bool },

    /// A new candidate entered the fallback list.
    #[serde(rename = "CandidateAddedEvent")]
    #[serde(rename_all = "camelCase")]
    CandidateAdded {
        source: String,
        embed: Option<String>,
    },

    /// Fast lookup and full scan both finished.
    #[serde(rename = "HuntFinishedEvent")]
    #[serde(rename_all = "camelCase")]
    HuntFinished { total: usize },

    /// Terminal: neither fast lookup nor full scan produced any candidate.
    #[serde(rename = "NoStreamsEvent")]
    NoStreams {},

    /// The engine started loading a candidate.
    #[serde(rename = "StreamStartEvent")]
    #[serde(rename_all = "camelCase")]
    StreamStart {
        source: String,
        embed: Option<String>,
    },

    #[serde(rename = "StateChangedEvent")]
    #[serde(rename_all = "camelCase")]
    StateChanged { state: PlaybackState },

    /// Derived played/buffered fractions, published on the playback clock.
    #[serde(rename = "ProgressTickEvent")]
    #[serde(rename_all = "camelCase")]
    ProgressTick {
        position: f64,
        duration: f64,
        played: f64,
        buffered: f64,
    },

    #[serde(rename = "QualityChangedEvent")]
    #[serde(rename_all = "camelCase")]
    QualityChanged { quality: String },

    /// The active caption track changed; `lang: None` means captions off.
    #[serde(rename = "SubtitlesChangedEvent")]
    #[serde(rename_all = "camelCase")]
    SubtitlesChanged { lang: Option<String> },

    /// The set of currently visible cue lines changed. Lines are sanitized
    /// and ready for display, stacked in cue order.
    #[serde(rename = "SubtitleRenderEvent")]
    #[serde(rename_all = "camelCase")]
    SubtitleRender { lines: Vec<String> },

    /// The current candidate failed fatally; the engine is moving on.
    #[serde(rename = "SourceFailedEvent")]
    #[serde(rename_all = "camelCase")]
    SourceFailed {
        source: String,
        embed: Option<String>,
        reason: String,
    },

    /// Terminal: every known candidate has been tried and failed.
    #[serde(rename = "AllSourcesFailedEvent")]
    AllSourcesFailed {},
}

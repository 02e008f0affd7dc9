use std::sync::Arc;

/// The single media output owned by the engine for a session's lifetime.
///
/// Implemented by the embedder over whatever actually renders frames (an
/// HTML media element behind WASM bindings, an mpv/gstreamer handle, a test
/// fake). The engine is the only writer; no other component may touch the
/// sink while a session is open.
///
/// Implementations report what happens through the `MediaEvent` channel the
/// session hands them, and must stop reporting for a source once
/// `set_source`/`clear_source` has replaced it.
pub trait MediaSink: Send + Sync {
    fn set_source(&self, url: &str);
    fn clear_source(&self);
    fn play(&self);
    fn pause(&self);
    /// Current playback position in seconds.
    fn position(&self) -> f64;
    fn set_position(&self, seconds: f64);
    /// Total duration in seconds, once known.
    fn duration(&self) -> Option<f64>;
    /// End of the furthest contiguous buffered range, in seconds.
    fn buffered_end(&self) -> f64;
    fn set_volume(&self, volume: f32);
    fn set_rate(&self, rate: f32);
}

/// Everything the media pipeline tells the engine.
#[derive(Debug, Clone)]
pub enum MediaEvent {
    /// The adaptive layer parsed the manifest; renditions are known and the
    /// stream is ready to play. Direct-file streams never send this.
    ManifestReady { levels: Vec<QualityLevel> },
    /// A media fragment arrived. First light for the load-timeout guard.
    FragmentLoaded,
    /// The playback clock moved.
    TimeUpdate,
    Playing,
    Paused,
    Ended,
    Error(StreamError),
}

/// One rendition exposed by an adaptive stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityLevel {
    /// Vertical resolution in pixels.
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct StreamError {
    pub kind: StreamErrorKind,
    pub detail: String,
}

/// Error taxonomy driving the recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// Transient transport failure. Retried in place with bounded attempts,
    /// then escalated to a candidate switch.
    Network,
    /// Corrupt or undecodable media. In-place pipeline recovery, never a
    /// candidate switch.
    Media,
    /// Unrecoverable on this candidate. Advances the fallback list.
    Fatal,
}

impl StreamError {
    pub fn new(kind: StreamErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Rewrites an upstream URL before the adaptive layer requests it. Bound to
/// the proxy adapter and the candidate's forced headers at attach time.
pub type UrlRewriter = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Builds adaptive-streaming attachments on top of the media sink.
pub trait AdaptiveFactory: Send + Sync {
    /// Attach a new adaptive session for `manifest_url`. Every sub-resource
    /// request (variant playlists, segments, key files) must pass through
    /// `rewrite` first, and everything observed must be reported on
    /// `events`.
    fn attach(
        &self,
        sink: Arc<dyn MediaSink>,
        manifest_url: &str,
        rewrite: UrlRewriter,
        events: flume::Sender<MediaEvent>,
    ) -> Box<dyn AdaptiveSession>;
}

/// A live adaptive-streaming attachment. At most one exists per engine at
/// any time; `destroy` must be idempotent and stop all event delivery.
pub trait AdaptiveSession: Send {
    fn levels(&self) -> Vec<QualityLevel>;
    /// `None` means automatic rendition selection.
    fn current_level(&self) -> Option<usize>;
    fn set_level(&mut self, level: Option<usize>);
    /// Restart loading after a network-class failure.
    fn start_load(&mut self);
    /// Attempt in-place recovery after a media-class failure.
    fn recover_media(&mut self);
    fn destroy(&mut self);
}

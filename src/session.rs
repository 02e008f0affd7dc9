use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    api::{BackendClient, PlayerEvent},
    common::{PlaybackSessionId, PlayerError},
    configs::Config,
    hunter::{CandidateList, StreamHunter, StreamRequest},
    player::{AdaptiveFactory, MediaEvent, MediaSink, PlaybackEngine},
    proxy::ProxyAdapter,
    storage::{KvStore, PreferenceStore, ProgressRecord, ProgressSink},
};

/// Identity check for one playback session. Background work holds a guard
/// clone and checks it before touching session state; results that arrive
/// after `close` are discarded instead of mutating a newer session.
pub struct SessionGuard {
    id: PlaybackSessionId,
    closed: AtomicBool,
}

impl SessionGuard {
    pub(crate) fn new() -> Self {
        Self {
            id: PlaybackSessionId::generate(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> PlaybackSessionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// What the embedder brings to a session: the media output, the adaptive
/// layer over it, and a durable store.
pub struct SessionDeps {
    pub sink: Arc<dyn MediaSink>,
    pub adaptive: Arc<dyn AdaptiveFactory>,
    pub store: Arc<dyn KvStore>,
}

/// Everything a freshly opened session hands back: the session itself, the
/// event stream for the UI surface, and the channel the embedder's media
/// sink reports into.
pub struct SessionHandles {
    pub session: Arc<PlaybackSession>,
    pub events: flume::Receiver<PlayerEvent>,
    pub media_events: flume::Sender<MediaEvent>,
}

/// One playback request, end to end: identity, candidate list, engine, the
/// background hunt and the progress tracker. Constructed per request and
/// torn down whole; nothing about the current media survives in globals.
pub struct PlaybackSession {
    guard: Arc<SessionGuard>,
    request: StreamRequest,
    candidates: Arc<CandidateList>,
    engine: PlaybackEngine,
    store: Arc<dyn KvStore>,
    progress: Arc<ProgressSink>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PlaybackSession {
    /// Open a session and start hunting. Playback begins on the first
    /// candidate the hunt produces.
    pub async fn open(
        config: &Config,
        deps: SessionDeps,
        request: StreamRequest,
    ) -> Result<SessionHandles, PlayerError> {
        let (events_tx, events_rx) = flume::unbounded();
        let (media_tx, media_rx) = flume::unbounded();

        let backend = Arc::new(BackendClient::new(&config.backend)?);
        let proxy = Arc::new(ProxyAdapter::new(config.backend.proxy_endpoint.clone()));
        let prefs = Arc::new(PreferenceStore::open(deps.store.clone()).await);
        let candidates = Arc::new(CandidateList::new());
        let guard = Arc::new(SessionGuard::new());

        let engine = PlaybackEngine::new(
            deps.sink,
            deps.adaptive,
            proxy,
            backend.clone(),
            prefs,
            candidates.clone(),
            config.player.clone(),
            events_tx.clone(),
        );

        let progress = Arc::new(ProgressSink::new(
            deps.store.clone(),
            request.kind,
            &request.media_id,
            request.season,
            request.episode,
        ));

        info!(
            "opening playback session {} for {} {}",
            guard.id(),
            request.kind,
            request.media_id
        );

        let session = Arc::new(Self {
            guard: guard.clone(),
            request: request.clone(),
            candidates: candidates.clone(),
            engine: engine.clone(),
            store: deps.store,
            progress: progress.clone(),
            tasks: Mutex::new(Vec::new()),
        });

        let sink_pump = engine.spawn_sink_pump(media_rx);

        let hunt = {
            let hunter = StreamHunter::new(backend);
            let engine = engine.clone();
            tokio::spawn(async move {
                hunter
                    .hunt(guard, request, candidates, engine, events_tx)
                    .await;
            })
        };

        let progress_task = {
            let engine = engine.clone();
            let interval_secs = config.player.progress_interval_secs.max(1);
            tokio::spawn(async move {
                progress_loop(engine, progress, interval_secs).await;
            })
        };

        session
            .tasks
            .lock()
            .extend([sink_pump, hunt, progress_task]);

        Ok(SessionHandles {
            session,
            events: events_rx,
            media_events: media_tx,
        })
    }

    pub fn id(&self) -> PlaybackSessionId {
        self.guard.id()
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    pub fn candidates(&self) -> &Arc<CandidateList> {
        &self.candidates
    }

    pub fn request(&self) -> &StreamRequest {
        &self.request
    }

    /// Last persisted position for this media unit, for resume-on-reopen.
    pub async fn saved_progress(&self) -> Option<ProgressRecord> {
        ProgressSink::load(&self.store, self.request.kind, &self.request.media_id).await
    }

    /// Tear the whole session down: stop the hunt, write a final progress
    /// snapshot, release the engine. Safe to call more than once.
    pub async fn close(&self) {
        if self.guard.is_closed() {
            debug!("close on already-closed session {}", self.guard.id());
            return;
        }
        info!("closing playback session {}", self.guard.id());
        self.guard.close();

        if let Some((time, duration)) = self.engine.playback_clock().await {
            self.progress.save(time, duration).await;
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.engine.destroy().await;
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.guard.close();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// Snapshot the playback clock on a fixed cadence, only while actively
/// playing. The task dies with the session.
async fn progress_loop(engine: PlaybackEngine, progress: Arc<ProgressSink>, interval_secs: u64) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        if let Some((time, duration)) = engine.playback_clock().await {
            progress.save(time, duration).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{Caption, StreamHeaders};
    use crate::common::{MediaId, MediaKind};
    use crate::configs::BackendConfig;
    use crate::player::{
        AdaptiveSession, MediaSink, PlaybackState, QualityLevel, UrlRewriter,
    };
    use crate::storage::MemoryStore;

    struct NullSink;

    impl MediaSink for NullSink {
        fn set_source(&self, _url: &str) {}
        fn clear_source(&self) {}
        fn play(&self) {}
        fn pause(&self) {}
        fn position(&self) -> f64 {
            0.0
        }
        fn set_position(&self, _seconds: f64) {}
        fn duration(&self) -> Option<f64> {
            None
        }
        fn buffered_end(&self) -> f64 {
            0.0
        }
        fn set_volume(&self, _volume: f32) {}
        fn set_rate(&self, _rate: f32) {}
    }

    struct NullAdaptive;

    struct NullAdaptiveSession;

    impl AdaptiveSession for NullAdaptiveSession {
        fn levels(&self) -> Vec<QualityLevel> {
            Vec::new()
        }
        fn current_level(&self) -> Option<usize> {
            None
        }
        fn set_level(&mut self, _level: Option<usize>) {}
        fn start_load(&mut self) {}
        fn recover_media(&mut self) {}
        fn destroy(&mut self) {}
    }

    impl AdaptiveFactory for NullAdaptive {
        fn attach(
            &self,
            _sink: Arc<dyn MediaSink>,
            _manifest_url: &str,
            _rewrite: UrlRewriter,
            _events: flume::Sender<MediaEvent>,
        ) -> Box<dyn AdaptiveSession> {
            Box::new(NullAdaptiveSession)
        }
    }

    fn unreachable_config() -> Config {
        Config {
            backend: BackendConfig {
                // Discard port: connections fail fast, the hunt comes up dry.
                base_url: "http://127.0.0.1:9".to_string(),
                ..BackendConfig::default()
            },
            ..Config::default()
        }
    }

    fn deps() -> SessionDeps {
        SessionDeps {
            sink: Arc::new(NullSink),
            adaptive: Arc::new(NullAdaptive),
            store: Arc::new(MemoryStore::new()),
        }
    }

    fn movie_request() -> StreamRequest {
        StreamRequest {
            kind: MediaKind::Movie,
            media_id: MediaId::from("603"),
            season: None,
            episode: None,
        }
    }

    #[tokio::test]
    async fn dry_hunt_surfaces_terminal_no_streams() {
        let handles = PlaybackSession::open(&unreachable_config(), deps(), movie_request())
            .await
            .unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(10), async {
            loop {
                let event = handles.events.recv_async().await.unwrap();
                if matches!(event, PlayerEvent::NoStreams {}) {
                    break event;
                }
            }
        })
        .await
        .expect("hunt should signal no streams");

        assert!(matches!(event, PlayerEvent::NoStreams {}));
        assert_eq!(
            handles.session.engine().state().await,
            PlaybackState::Error { fatal: true }
        );
        assert!(handles.session.candidates().is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_discards_late_results() {
        let handles = PlaybackSession::open(&unreachable_config(), deps(), movie_request())
            .await
            .unwrap();

        let session = handles.session.clone();
        session.close().await;
        session.close().await;

        assert!(session.guard.is_closed());
        assert_eq!(session.engine().state().await, PlaybackState::Idle);

        // A result arriving for the closed session must not start playback.
        let stale = crate::hunter::StreamDescriptor {
            source: "late".to_string(),
            embed: None,
            stream: crate::hunter::StreamSource::Hls {
                playlist: "https://cdn.example/late.m3u8".to_string(),
                headers: StreamHeaders::default(),
                captions: vec![Caption {
                    lang: "en".to_string(),
                    url: "https://subs.example/en.vtt".to_string(),
                }],
            },
        };
        if let Some(descriptor) = session.candidates().push(stale) {
            session.engine().start_if_idle(descriptor).await;
        }
        assert_eq!(session.engine().state().await, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn saved_progress_round_trips_through_the_store() {
        let store = Arc::new(MemoryStore::new());
        let deps = SessionDeps {
            sink: Arc::new(NullSink),
            adaptive: Arc::new(NullAdaptive),
            store: store.clone(),
        };

        ProgressSink::new(store, MediaKind::Movie, &MediaId::from("603"), None, None)
            .save(120.0, 7200.0)
            .await;

        let handles = PlaybackSession::open(&unreachable_config(), deps, movie_request())
            .await
            .unwrap();
        let record = handles.session.saved_progress().await.unwrap();
        assert_eq!(record.time, 120.0);
        handles.session.close().await;
    }
}

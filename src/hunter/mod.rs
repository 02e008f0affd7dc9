use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    api::{BackendClient, PlayerEvent, models::StreamEnvelope},
    common::{MediaId, MediaKind},
    player::PlaybackEngine,
    session::SessionGuard,
};

pub mod candidates;

pub use candidates::{CandidateList, DescriptorId, StreamDescriptor, StreamSource};

/// What to hunt for: one media unit, addressed explicitly.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub kind: MediaKind,
    pub media_id: MediaId,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

/// Queries the backend for candidate streams across providers and maintains
/// the session's ordered fallback list.
///
/// A hunt runs the fast single-provider lookup and the full multi-provider
/// scan concurrently; whichever lands first starts playback, and everything
/// else merges in behind it without interrupting. Individual provider
/// failures are non-fatal; only "zero results from both legs" is terminal.
pub struct StreamHunter {
    client: Arc<BackendClient>,
}

impl StreamHunter {
    pub fn new(client: Arc<BackendClient>) -> Self {
        Self { client }
    }

    pub async fn hunt(
        &self,
        guard: Arc<SessionGuard>,
        request: StreamRequest,
        candidates: Arc<CandidateList>,
        engine: PlaybackEngine,
        events: flume::Sender<PlayerEvent>,
    ) {
        let fast_leg = async {
            let envelope = self
                .client
                .fetch_fast(
                    request.kind,
                    &request.media_id,
                    request.season,
                    request.episode,
                )
                .await;

            match envelope {
                Some(envelope) if !guard.is_closed() => {
                    info!("fast lookup hit: {}", envelope.source);
                    let _ = events.send(PlayerEvent::ProviderStatus {
                        source: envelope.source.clone(),
                        found: true,
                    });
                    self.merge(&guard, &candidates, &engine, &events, envelope)
                        .await;
                }
                Some(_) => debug!("fast lookup result discarded: session closed"),
                None => debug!("fast lookup came up empty"),
            }
        };

        let full_leg = async {
            let roster = self.client.fetch_providers().await;
            let streams = self
                .client
                .fetch_all(
                    request.kind,
                    &request.media_id,
                    request.season,
                    request.episode,
                )
                .await;

            if guard.is_closed() {
                debug!("full scan results discarded: session closed");
                return;
            }

            let mut reported: HashSet<String> = HashSet::new();
            for envelope in streams {
                if reported.insert(envelope.source.clone()) {
                    let _ = events.send(PlayerEvent::ProviderStatus {
                        source: envelope.source.clone(),
                        found: true,
                    });
                }
                self.merge(&guard, &candidates, &engine, &events, envelope)
                    .await;
            }

            for provider in roster {
                if !provider.disabled && !reported.contains(&provider.id) {
                    let _ = events.send(PlayerEvent::ProviderStatus {
                        source: provider.id,
                        found: false,
                    });
                }
            }
        };

        // Both legs interleave; completion order is deliberately untied.
        futures::join!(fast_leg, full_leg);

        if guard.is_closed() {
            return;
        }

        if candidates.is_empty() {
            info!("hunt exhausted: no provider produced a stream");
            let _ = events.send(PlayerEvent::NoStreams {});
            engine.mark_no_streams().await;
        } else {
            let _ = events.send(PlayerEvent::HuntFinished {
                total: candidates.len(),
            });
        }
    }

    async fn merge(
        &self,
        guard: &Arc<SessionGuard>,
        candidates: &Arc<CandidateList>,
        engine: &PlaybackEngine,
        events: &flume::Sender<PlayerEvent>,
        envelope: StreamEnvelope,
    ) {
        if guard.is_closed() {
            return;
        }

        let descriptor = StreamDescriptor::from_envelope(envelope);
        let Some(descriptor) = candidates.push(descriptor) else {
            debug!("duplicate candidate suppressed");
            return;
        };

        let _ = events.send(PlayerEvent::CandidateAdded {
            source: descriptor.source.clone(),
            embed: descriptor.embed.clone(),
        });

        // First usable candidate starts playback; later merges only extend
        // the fallback list.
        engine.start_if_idle(descriptor).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{QualityOption, StreamHeaders, StreamPayload};
    use crate::configs::{BackendConfig, PlayerConfig};
    use crate::player::{
        AdaptiveFactory, AdaptiveSession, MediaEvent, MediaSink, PlaybackEngine, PlaybackState,
        QualityLevel, UrlRewriter,
    };
    use crate::proxy::ProxyAdapter;
    use crate::storage::{MemoryStore, PreferenceStore};

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
            _sink: std::sync::Arc<dyn MediaSink>,
            _manifest_url: &str,
            _rewrite: UrlRewriter,
            _events: flume::Sender<MediaEvent>,
        ) -> Box<dyn AdaptiveSession> {
            Box::new(NullAdaptiveSession)
        }
    }

    fn envelope(source: &str) -> StreamEnvelope {
        StreamEnvelope {
            source: source.to_string(),
            embed: None,
            stream: StreamPayload::File {
                qualities: vec![QualityOption {
                    quality: "1080".to_string(),
                    url: format!("https://cdn.example/{}/1080.mp4", source),
                }],
                headers: Some(StreamHeaders::default()),
                captions: Vec::new(),
            },
        }
    }

    struct MergeRig {
        hunter: StreamHunter,
        guard: Arc<crate::session::SessionGuard>,
        candidates: Arc<CandidateList>,
        engine: PlaybackEngine,
        events_tx: flume::Sender<PlayerEvent>,
        events_rx: flume::Receiver<PlayerEvent>,
    }

    async fn merge_rig() -> MergeRig {
        let backend = Arc::new(BackendClient::new(&BackendConfig::default()).unwrap());
        let candidates = Arc::new(CandidateList::new());
        let prefs = Arc::new(PreferenceStore::open(Arc::new(MemoryStore::new())).await);
        let (events_tx, events_rx) = flume::unbounded();

        let engine = PlaybackEngine::new(
            Arc::new(NullSink),
            Arc::new(NullAdaptive),
            Arc::new(ProxyAdapter::new("/proxy_stream")),
            backend.clone(),
            prefs,
            candidates.clone(),
            PlayerConfig::default(),
            events_tx.clone(),
        );

        MergeRig {
            hunter: StreamHunter::new(backend),
            guard: Arc::new(crate::session::SessionGuard::new()),
            candidates,
            engine,
            events_tx,
            events_rx,
        }
    }

    /// Fast lookup lands on A, then the full scan reports [A, B, C]: A is
    /// not duplicated, playback stays on A, and A's successor is B.
    #[tokio::test]
    async fn fast_hit_then_scan_merge_deduplicates_without_interrupting() {
        let rig = merge_rig().await;

        rig.hunter
            .merge(
                &rig.guard,
                &rig.candidates,
                &rig.engine,
                &rig.events_tx,
                envelope("alpha"),
            )
            .await;
        assert_eq!(rig.engine.state().await, PlaybackState::Loading);

        for source in ["alpha", "beta", "gamma"] {
            rig.hunter
                .merge(
                    &rig.guard,
                    &rig.candidates,
                    &rig.engine,
                    &rig.events_tx,
                    envelope(source),
                )
                .await;
        }

        assert_eq!(rig.candidates.len(), 3);
        assert_eq!(rig.engine.current_descriptor().await.unwrap().source, "alpha");

        let current = rig.engine.current_descriptor().await.unwrap();
        assert_eq!(rig.candidates.next_after(&current.id()).unwrap().source, "beta");

        let added: Vec<PlayerEvent> = rig
            .events_rx
            .drain()
            .filter(|e| matches!(e, PlayerEvent::CandidateAdded { .. }))
            .collect();
        assert_eq!(added.len(), 3);
    }

    #[tokio::test]
    async fn merges_for_a_closed_session_are_discarded() {
        let rig = merge_rig().await;
        rig.guard.close();

        rig.hunter
            .merge(
                &rig.guard,
                &rig.candidates,
                &rig.engine,
                &rig.events_tx,
                envelope("late"),
            )
            .await;

        assert!(rig.candidates.is_empty());
        assert_eq!(rig.engine.state().await, PlaybackState::Idle);
    }
}

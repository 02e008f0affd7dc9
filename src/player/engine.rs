use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::context::PlayerContext;
use super::media::{
    AdaptiveFactory, MediaEvent, MediaSink, QualityLevel, StreamError, StreamErrorKind,
    UrlRewriter,
};
use super::state::PlaybackState;
use crate::{
    api::{
        BackendClient, PlayerEvent,
        models::{Caption, QualityOption},
    },
    common::types::Shared,
    configs::PlayerConfig,
    hunter::{CandidateList, StreamDescriptor, StreamSource},
    proxy::ProxyAdapter,
    storage::PreferenceStore,
    subtitles::{self, Cue},
};

/// The playback engine: owns the media sink for the session's lifetime and
/// drives the candidate list against it.
///
/// Cheap to clone; all clones share one session state. Every mutation runs
/// behind one mutex, so event handlers, timers and public calls serialize
/// exactly like callbacks on a UI thread.
#[derive(Clone)]
pub struct PlaybackEngine {
    ctx: Shared<PlayerContext>,
    sink: Arc<dyn MediaSink>,
    adaptive_factory: Arc<dyn AdaptiveFactory>,
    proxy: Arc<ProxyAdapter>,
    backend: Arc<BackendClient>,
    prefs: Arc<PreferenceStore>,
    candidates: Arc<CandidateList>,
    config: Arc<PlayerConfig>,
    events: flume::Sender<PlayerEvent>,
}

impl PlaybackEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sink: Arc<dyn MediaSink>,
        adaptive_factory: Arc<dyn AdaptiveFactory>,
        proxy: Arc<ProxyAdapter>,
        backend: Arc<BackendClient>,
        prefs: Arc<PreferenceStore>,
        candidates: Arc<CandidateList>,
        config: PlayerConfig,
        events: flume::Sender<PlayerEvent>,
    ) -> Self {
        Self {
            ctx: Arc::new(tokio::sync::Mutex::new(PlayerContext::new())),
            sink,
            adaptive_factory,
            proxy,
            backend,
            prefs,
            candidates,
            config: Arc::new(config),
            events,
        }
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    fn set_state_locked(&self, ctx: &mut PlayerContext, state: PlaybackState) {
        if ctx.state != state {
            debug!("state {:?} -> {:?}", ctx.state, state);
            ctx.state = state;
            self.emit(PlayerEvent::StateChanged { state });
        }
    }

    // ---- loading & failover -------------------------------------------------

    pub async fn load_stream(&self, descriptor: Arc<StreamDescriptor>) {
        let mut ctx = self.ctx.lock().await;
        if ctx.destroyed {
            return;
        }
        self.load_locked(&mut ctx, descriptor);
    }

    /// Load only when nothing is playing yet: the hunter's first merged
    /// candidate starts playback, later merges just extend the list. Also
    /// picks a session back up when a late scan result arrives after the
    /// list was exhausted.
    pub async fn start_if_idle(&self, descriptor: Arc<StreamDescriptor>) {
        let mut ctx = self.ctx.lock().await;
        if ctx.destroyed {
            return;
        }
        match ctx.state {
            PlaybackState::Idle | PlaybackState::Error { fatal: true } => {
                self.load_locked(&mut ctx, descriptor)
            }
            _ => {}
        }
    }

    /// Terminal signal from the hunter: both legs finished with nothing.
    pub async fn mark_no_streams(&self) {
        let mut ctx = self.ctx.lock().await;
        if ctx.destroyed || !matches!(ctx.state, PlaybackState::Idle) {
            return;
        }
        self.set_state_locked(&mut ctx, PlaybackState::Error { fatal: true });
    }

    fn load_locked(&self, ctx: &mut PlayerContext, descriptor: Arc<StreamDescriptor>) {
        // Previous attachment goes away before anything new is constructed;
        // attachments never overlap.
        ctx.cancel_timers();
        ctx.teardown_attachment();
        ctx.reset_captions();
        ctx.file_qualities.clear();
        ctx.file_quality = None;
        ctx.file_url = None;
        ctx.network_retries = 0;
        ctx.generation += 1;

        let id = descriptor.id();
        info!("loading stream: {}", id);
        ctx.current = Some(descriptor.clone());
        self.set_state_locked(ctx, PlaybackState::Loading);
        self.emit(PlayerEvent::StreamStart {
            source: descriptor.source.clone(),
            embed: descriptor.embed.clone(),
        });

        let prefs = self.prefs.current();
        self.sink.set_volume(prefs.volume);

        match &descriptor.stream {
            StreamSource::Hls {
                playlist, headers, ..
            } => {
                let manifest_url = self.proxy.proxied(playlist, Some(headers));
                let rewrite: UrlRewriter = {
                    let proxy = self.proxy.clone();
                    let headers = headers.clone();
                    Arc::new(move |url: &str| proxy.proxied(url, Some(&headers)))
                };

                let (tx, rx) = flume::unbounded();
                let session =
                    self.adaptive_factory
                        .attach(self.sink.clone(), &manifest_url, rewrite, tx);
                ctx.adaptive = Some(session);
                ctx.adaptive_pump = Some(self.spawn_adaptive_pump(ctx.generation, rx));
                // Playback is deferred until the manifest is parsed.
            }
            StreamSource::File {
                qualities, headers, ..
            } => {
                let sorted = sort_qualities(qualities.clone());
                let pick = pick_file_quality(&prefs.preferred_quality, &sorted).cloned();
                match pick {
                    Some(option) => {
                        let url = self.proxy.proxied(&option.url, Some(headers));
                        debug!("loading file rendition {} via proxy", option.quality);
                        self.sink.set_source(&url);
                        ctx.file_url = Some(url);
                        ctx.file_quality = Some(option.quality.clone());
                        ctx.file_qualities = sorted;
                        // No manifest step for direct files.
                        self.sink.play();
                    }
                    None => {
                        warn!("file stream with no renditions: {}", id);
                        self.advance_locked(ctx, "stream has no playable renditions");
                        return;
                    }
                }
            }
        }

        self.arm_load_timeout_locked(ctx);

        let captions = descriptor.captions().to_vec();
        if prefs.autoplay_subtitles && !captions.is_empty() {
            let pick = captions
                .iter()
                .find(|c| c.lang == "en")
                .cloned()
                .unwrap_or_else(|| captions[0].clone());
            let engine = self.clone();
            let generation = ctx.generation;
            ctx.caption_task = Some(tokio::spawn(async move {
                engine.load_caption_for_generation(generation, pick).await;
            }));
        }
    }

    /// Advance to the next untried candidate, identity-keyed. Not reentrant:
    /// a trigger while an advance is in flight is a no-op; stale triggers
    /// from an earlier attempt are dropped by generation checks before they
    /// get here.
    fn advance_locked(&self, ctx: &mut PlayerContext, reason: &str) {
        if ctx.advancing {
            debug!("advance already in flight, ignoring trigger");
            return;
        }
        ctx.advancing = true;

        let next = match &ctx.current {
            Some(current) => {
                warn!("candidate {} failed: {}", current.id(), reason);
                self.emit(PlayerEvent::SourceFailed {
                    source: current.source.clone(),
                    embed: current.embed.clone(),
                    reason: reason.to_string(),
                });
                self.candidates.next_after(&current.id())
            }
            None => self.candidates.first(),
        };

        // Resolved either way from here: loading the next candidate may
        // itself advance again (e.g. a rendition-less file stream).
        ctx.advancing = false;

        match next {
            Some(descriptor) => self.load_locked(ctx, descriptor),
            None => {
                warn!("all candidates exhausted");
                ctx.cancel_timers();
                ctx.teardown_attachment();
                self.sink.pause();
                self.sink.clear_source();
                self.set_state_locked(ctx, PlaybackState::Error { fatal: true });
                self.emit(PlayerEvent::AllSourcesFailed {});
            }
        }
    }

    fn arm_load_timeout_locked(&self, ctx: &mut PlayerContext) {
        if let Some(guard) = ctx.load_timeout.take() {
            guard.abort();
        }
        let engine = self.clone();
        let generation = ctx.generation;
        let timeout = std::time::Duration::from_millis(self.config.load_timeout_ms);
        ctx.load_timeout = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            engine.on_load_timeout(generation).await;
        }));
    }

    async fn on_load_timeout(&self, generation: u64) {
        let mut ctx = self.ctx.lock().await;
        if ctx.destroyed || ctx.generation != generation {
            return;
        }
        if !ctx.state.awaiting_playback() {
            return;
        }
        warn!("load timeout, trying next candidate");
        ctx.load_timeout = None;
        self.advance_locked(&mut ctx, "load timeout");
    }

    // ---- media events -------------------------------------------------------

    fn spawn_adaptive_pump(
        &self,
        generation: u64,
        rx: flume::Receiver<MediaEvent>,
    ) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv_async().await {
                engine.handle_adaptive_event(generation, event).await;
            }
        })
    }

    /// Pump for sink-level events. The session owns the returned handle.
    pub fn spawn_sink_pump(&self, rx: flume::Receiver<MediaEvent>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv_async().await {
                engine.handle_media_event(event).await;
            }
        })
    }

    /// Events from the media sink itself (the single owned output).
    pub async fn handle_media_event(&self, event: MediaEvent) {
        let mut ctx = self.ctx.lock().await;
        if ctx.destroyed {
            return;
        }
        self.dispatch_locked(&mut ctx, event);
    }

    /// Events from an adaptive attachment; dropped when the attempt that
    /// armed them is no longer current.
    async fn handle_adaptive_event(&self, generation: u64, event: MediaEvent) {
        let mut ctx = self.ctx.lock().await;
        if ctx.destroyed || ctx.generation != generation {
            debug!("dropping stale adaptive event");
            return;
        }
        self.dispatch_locked(&mut ctx, event);
    }

    fn dispatch_locked(&self, ctx: &mut PlayerContext, event: MediaEvent) {
        match event {
            MediaEvent::ManifestReady { levels } => self.manifest_ready_locked(ctx, levels),
            MediaEvent::FragmentLoaded => {
                // First light: stop the load-timeout clock.
                if let Some(guard) = ctx.load_timeout.take() {
                    guard.abort();
                }
            }
            MediaEvent::TimeUpdate => self.time_update_locked(ctx),
            MediaEvent::Playing => {
                ctx.cancel_load_guards();
                ctx.network_retries = 0;
                self.set_state_locked(ctx, PlaybackState::Playing);
            }
            MediaEvent::Paused => {
                if matches!(ctx.state, PlaybackState::Playing) {
                    self.set_state_locked(ctx, PlaybackState::Paused);
                }
            }
            MediaEvent::Ended => {
                ctx.cancel_load_guards();
                self.set_state_locked(ctx, PlaybackState::Ended);
            }
            MediaEvent::Error(error) => self.stream_error_locked(ctx, error),
        }
    }

    fn manifest_ready_locked(&self, ctx: &mut PlayerContext, levels: Vec<QualityLevel>) {
        debug!("manifest parsed: {} quality levels", levels.len());
        ctx.adaptive_levels = levels;
        if let Some(guard) = ctx.load_timeout.take() {
            guard.abort();
        }

        // A pinned rung from a previous session is honored when the new
        // stream offers it; otherwise the adaptive layer keeps auto.
        let preferred = self.prefs.current().preferred_quality;
        if preferred != "auto" {
            if let Ok(height) = preferred.parse::<u32>() {
                let index = ctx.adaptive_levels.iter().position(|l| l.height == height);
                if let (Some(index), Some(adaptive)) = (index, ctx.adaptive.as_mut()) {
                    adaptive.set_level(Some(index));
                }
            }
        }

        self.set_state_locked(ctx, PlaybackState::Ready);
        self.sink.play();
    }

    // ---- error recovery -----------------------------------------------------

    fn stream_error_locked(&self, ctx: &mut PlayerContext, error: StreamError) {
        if ctx.state.is_terminal() {
            return;
        }

        match error.kind {
            StreamErrorKind::Media => {
                warn!("media error, attempting in-place recovery: {}", error.detail);
                match ctx.adaptive.as_mut() {
                    Some(adaptive) => adaptive.recover_media(),
                    None => self.reload_file_locked(ctx),
                }
                self.set_state_locked(ctx, PlaybackState::Error { fatal: false });
                self.arm_recovery_probe_locked(ctx);
            }
            StreamErrorKind::Network => {
                if ctx.network_retries < self.config.network_retry.max_retries {
                    let attempt = ctx.network_retries;
                    ctx.network_retries += 1;
                    warn!(
                        "network error, in-place retry {}/{}: {}",
                        ctx.network_retries, self.config.network_retry.max_retries, error.detail
                    );
                    match ctx.adaptive.as_mut() {
                        Some(adaptive) => adaptive.start_load(),
                        None => {
                            let delay = self.config.network_retry.backoff_ms(attempt);
                            self.schedule_file_retry_locked(ctx, delay);
                        }
                    }
                    self.set_state_locked(ctx, PlaybackState::Error { fatal: false });
                    self.arm_recovery_probe_locked(ctx);
                } else {
                    self.advance_locked(ctx, "network error retries exhausted");
                }
            }
            StreamErrorKind::Fatal => {
                self.advance_locked(ctx, &error.detail);
            }
        }
    }

    /// Bounded wait after an in-place recovery attempt: if playback has not
    /// resumed by then, escalate to a candidate switch.
    fn arm_recovery_probe_locked(&self, ctx: &mut PlayerContext) {
        if let Some(probe) = ctx.recovery_probe.take() {
            probe.abort();
        }
        let engine = self.clone();
        let generation = ctx.generation;
        let wait = std::time::Duration::from_millis(self.config.recovery_wait_ms);
        ctx.recovery_probe = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            engine.on_recovery_probe(generation).await;
        }));
    }

    async fn on_recovery_probe(&self, generation: u64) {
        let mut ctx = self.ctx.lock().await;
        if ctx.destroyed || ctx.generation != generation {
            return;
        }
        if ctx.state.awaiting_playback() {
            warn!("in-place recovery failed, trying next candidate");
            ctx.recovery_probe = None;
            self.advance_locked(&mut ctx, "recovery failed");
        }
    }

    fn reload_file_locked(&self, ctx: &mut PlayerContext) {
        let Some(url) = ctx.file_url.clone() else {
            return;
        };
        let position = self.sink.position();
        self.sink.set_source(&url);
        self.sink.set_position(position);
        self.sink.play();
    }

    fn schedule_file_retry_locked(&self, ctx: &mut PlayerContext, delay_ms: u64) {
        let engine = self.clone();
        let generation = ctx.generation;
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            let mut ctx = engine.ctx.lock().await;
            if ctx.destroyed || ctx.generation != generation {
                return;
            }
            engine.reload_file_locked(&mut ctx);
        });
    }

    // ---- transport controls -------------------------------------------------

    pub async fn play(&self) {
        let ctx = self.ctx.lock().await;
        if ctx.destroyed || ctx.state.is_terminal() {
            return;
        }
        self.sink.play();
    }

    pub async fn pause(&self) {
        let ctx = self.ctx.lock().await;
        if ctx.destroyed {
            return;
        }
        self.sink.pause();
    }

    pub async fn toggle_play(&self) {
        let ctx = self.ctx.lock().await;
        if ctx.destroyed {
            return;
        }
        match ctx.state {
            PlaybackState::Playing => self.sink.pause(),
            PlaybackState::Paused | PlaybackState::Ready => self.sink.play(),
            _ => {}
        }
    }

    pub async fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        {
            let ctx = self.ctx.lock().await;
            if ctx.destroyed {
                return;
            }
            self.sink.set_volume(volume);
        }
        self.prefs.update(|p| p.volume = volume).await;
    }

    pub async fn set_rate(&self, rate: f32) {
        let ctx = self.ctx.lock().await;
        if ctx.destroyed {
            return;
        }
        self.sink.set_rate(rate);
    }

    // ---- seeking ------------------------------------------------------------

    pub async fn seek_to_fraction(&self, fraction: f64) {
        let ctx = self.ctx.lock().await;
        if ctx.destroyed {
            return;
        }
        self.apply_seek_fraction(fraction);
    }

    fn apply_seek_fraction(&self, fraction: f64) {
        let duration = self.sink.duration().unwrap_or(0.0);
        let target = (fraction.clamp(0.0, 1.0) * duration).clamp(0.0, duration);
        self.sink.set_position(target);
    }

    /// A scrub gesture suppresses tick-driven progress updates until
    /// released, so the bar tracks the finger instead of the clock.
    pub async fn begin_scrub(&self) {
        let mut ctx = self.ctx.lock().await;
        ctx.scrubbing = true;
        ctx.scrub_target = None;
    }

    pub async fn scrub_to(&self, fraction: f64) {
        let mut ctx = self.ctx.lock().await;
        if ctx.scrubbing {
            ctx.scrub_target = Some(fraction.clamp(0.0, 1.0));
        }
    }

    pub async fn end_scrub(&self) {
        let mut ctx = self.ctx.lock().await;
        ctx.scrubbing = false;
        if let Some(fraction) = ctx.scrub_target.take() {
            if !ctx.destroyed {
                self.apply_seek_fraction(fraction);
            }
        }
    }

    pub async fn skip(&self, delta_seconds: f64) {
        let ctx = self.ctx.lock().await;
        if ctx.destroyed {
            return;
        }
        let duration = self.sink.duration().unwrap_or(0.0);
        let target = (self.sink.position() + delta_seconds).clamp(0.0, duration);
        self.sink.set_position(target);
    }

    // ---- quality selection --------------------------------------------------

    /// Renditions of the active stream: adaptive levels or file rungs.
    pub async fn quality_menu(&self) -> (Vec<QualityLevel>, Vec<QualityOption>) {
        let ctx = self.ctx.lock().await;
        (ctx.adaptive_levels.clone(), ctx.file_qualities.clone())
    }

    /// Pin an adaptive rendition, or return to automatic with `None`.
    pub async fn set_adaptive_level(&self, level: Option<usize>) {
        let quality = {
            let mut ctx = self.ctx.lock().await;
            if ctx.destroyed {
                return;
            }
            let quality = match level {
                None => "auto".to_string(),
                Some(index) => match ctx.adaptive_levels.get(index) {
                    Some(l) => l.height.to_string(),
                    None => return,
                },
            };
            match ctx.adaptive.as_mut() {
                Some(adaptive) => adaptive.set_level(level),
                None => return,
            }
            quality
        };

        self.prefs
            .update(|p| p.preferred_quality = quality.clone())
            .await;
        self.emit(PlayerEvent::QualityChanged { quality });
    }

    /// Switch the active file-type stream to another pre-encoded rendition,
    /// preserving position and play state across the swap.
    pub async fn set_file_quality(&self, quality: &str) {
        let quality = {
            let mut ctx = self.ctx.lock().await;
            if ctx.destroyed {
                return;
            }
            let Some(option) = ctx
                .file_qualities
                .iter()
                .find(|q| q.quality == quality)
                .cloned()
            else {
                return;
            };
            let Some(current) = ctx.current.clone() else {
                return;
            };

            let position = self.sink.position();
            let was_playing = matches!(ctx.state, PlaybackState::Playing);

            let url = self.proxy.proxied(&option.url, Some(current.headers()));
            self.sink.set_source(&url);
            self.sink.set_position(position);
            if was_playing {
                self.sink.play();
            }

            ctx.file_url = Some(url);
            ctx.file_quality = Some(option.quality.clone());
            option.quality
        };

        self.prefs
            .update(|p| p.preferred_quality = quality.clone())
            .await;
        self.emit(PlayerEvent::QualityChanged { quality });
    }

    // ---- captions -----------------------------------------------------------

    pub async fn enable_captions(&self, caption: Caption) {
        let generation = {
            let ctx = self.ctx.lock().await;
            if ctx.destroyed {
                return;
            }
            ctx.generation
        };
        self.load_caption_for_generation(generation, caption).await;
    }

    async fn load_caption_for_generation(&self, generation: u64, caption: Caption) {
        let url = self.proxy.maybe_proxied(&caption.url, None);
        let Some(text) = self.backend.fetch_caption(&url).await else {
            // Non-fatal: captions stay off, playback is unaffected.
            warn!("subtitle fetch failed, captions disabled for this stream");
            return;
        };
        self.install_caption_document(generation, caption, &text)
            .await;
    }

    /// Install a subtitle document already in hand (embedder-side fetching,
    /// user-supplied files). Parse failures disable captions silently.
    pub async fn set_caption_document(&self, caption: Caption, raw: &str) {
        let generation = {
            let ctx = self.ctx.lock().await;
            if ctx.destroyed {
                return;
            }
            ctx.generation
        };
        self.install_caption_document(generation, caption, raw).await;
    }

    async fn install_caption_document(&self, generation: u64, caption: Caption, raw: &str) {
        let cues = subtitles::parse(raw);
        if cues.is_empty() {
            warn!("subtitle document had no usable cues, captions disabled");
            return;
        }

        let mut ctx = self.ctx.lock().await;
        if ctx.destroyed || ctx.generation != generation {
            debug!("dropping subtitle document for a stale attempt");
            return;
        }
        ctx.cues = cues;
        ctx.visible_lines.clear();
        let lang = caption.lang.clone();
        ctx.active_caption = Some(caption);
        self.emit(PlayerEvent::SubtitlesChanged { lang: Some(lang) });
    }

    pub async fn disable_captions(&self) {
        let mut ctx = self.ctx.lock().await;
        ctx.reset_captions();
        self.emit(PlayerEvent::SubtitlesChanged { lang: None });
        self.emit(PlayerEvent::SubtitleRender { lines: Vec::new() });
    }

    /// Signed user adjustment added to the playback clock before cue lookup.
    pub async fn set_caption_offset(&self, offset_seconds: f64) {
        let mut ctx = self.ctx.lock().await;
        ctx.caption_offset = offset_seconds;
    }

    /// The sanitized cue lines visible right now, stacked in cue order.
    pub async fn visible_cues(&self) -> Vec<String> {
        let ctx = self.ctx.lock().await;
        active_lines(&ctx.cues, self.sink.position(), ctx.caption_offset)
    }

    // ---- derived progress ---------------------------------------------------

    fn time_update_locked(&self, ctx: &mut PlayerContext) {
        if ctx.scrubbing {
            return;
        }
        let position = self.sink.position();
        let duration = match self.sink.duration() {
            Some(d) if d > 0.0 => d,
            _ => return,
        };

        self.emit(PlayerEvent::ProgressTick {
            position,
            duration,
            played: (position / duration).clamp(0.0, 1.0),
            buffered: (self.sink.buffered_end() / duration).clamp(0.0, 1.0),
        });

        if !ctx.cues.is_empty() {
            let lines = active_lines(&ctx.cues, position, ctx.caption_offset);
            if lines != ctx.visible_lines {
                ctx.visible_lines = lines.clone();
                self.emit(PlayerEvent::SubtitleRender { lines });
            }
        }
    }

    /// Position and duration while actively playing; `None` otherwise. The
    /// progress tracker samples this on its cadence.
    pub async fn playback_clock(&self) -> Option<(f64, f64)> {
        let ctx = self.ctx.lock().await;
        if !matches!(ctx.state, PlaybackState::Playing) {
            return None;
        }
        let duration = self.sink.duration()?;
        Some((self.sink.position(), duration))
    }

    pub async fn state(&self) -> PlaybackState {
        self.ctx.lock().await.state
    }

    pub async fn current_descriptor(&self) -> Option<Arc<StreamDescriptor>> {
        self.ctx.lock().await.current.clone()
    }

    // ---- teardown -----------------------------------------------------------

    /// Release everything. Valid from any state, idempotent, and leaves no
    /// pending timers behind.
    pub async fn destroy(&self) {
        let mut ctx = self.ctx.lock().await;
        if ctx.destroyed {
            return;
        }
        info!("destroying playback engine");
        ctx.destroyed = true;
        ctx.cancel_timers();
        ctx.teardown_attachment();
        self.sink.pause();
        self.sink.clear_source();
        ctx.state = PlaybackState::Idle;
    }

    #[cfg(test)]
    pub(crate) async fn has_pending_timers(&self) -> bool {
        self.ctx.lock().await.has_pending_timers()
    }
}

fn active_lines(cues: &[Cue], position: f64, offset: f64) -> Vec<String> {
    subtitles::active_cues(cues, position, offset)
        .iter()
        .map(|c| subtitles::sanitize(&c.text))
        .collect()
}

/// Renditions ordered best-first; non-numeric rungs keep their listed order
/// at the tail.
fn sort_qualities(mut qualities: Vec<QualityOption>) -> Vec<QualityOption> {
    qualities.sort_by_key(|q| std::cmp::Reverse(q.quality.parse::<u32>().unwrap_or(0)));
    qualities
}

/// The persisted rung when the stream offers it, else the best numeric
/// rung, else the first listed.
fn pick_file_quality<'a>(
    preferred: &str,
    sorted: &'a [QualityOption],
) -> Option<&'a QualityOption> {
    if preferred != "auto" {
        if let Some(option) = sorted.iter().find(|q| q.quality == preferred) {
            return Some(option);
        }
    }
    sorted.first()
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::media::AdaptiveSession;
    use crate::api::models::StreamHeaders;
    use crate::configs::BackendConfig;
    use crate::storage::MemoryStore;
    use parking_lot::Mutex;

    // ---- fakes -------------------------------------------------------------

    #[derive(Default)]
    struct FakeSinkState {
        source: Option<String>,
        position: f64,
        duration: Option<f64>,
        buffered: f64,
        playing: bool,
        volume: f32,
        rate: f32,
    }

    #[derive(Default)]
    struct FakeSink {
        state: Mutex<FakeSinkState>,
    }

    impl FakeSink {
        fn source(&self) -> Option<String> {
            self.state.lock().source.clone()
        }

        fn set_duration(&self, duration: f64) {
            self.state.lock().duration = Some(duration);
        }

        fn force_position(&self, position: f64) {
            self.state.lock().position = position;
        }

        fn set_buffered(&self, buffered: f64) {
            self.state.lock().buffered = buffered;
        }
    }

    impl MediaSink for FakeSink {
        fn set_source(&self, url: &str) {
            let mut state = self.state.lock();
            state.source = Some(url.to_string());
            state.position = 0.0;
        }

        fn clear_source(&self) {
            let mut state = self.state.lock();
            state.source = None;
            state.playing = false;
        }

        fn play(&self) {
            self.state.lock().playing = true;
        }

        fn pause(&self) {
            self.state.lock().playing = false;
        }

        fn position(&self) -> f64 {
            self.state.lock().position
        }

        fn set_position(&self, seconds: f64) {
            self.state.lock().position = seconds;
        }

        fn duration(&self) -> Option<f64> {
            self.state.lock().duration
        }

        fn buffered_end(&self) -> f64 {
            self.state.lock().buffered
        }

        fn set_volume(&self, volume: f32) {
            self.state.lock().volume = volume;
        }

        fn set_rate(&self, rate: f32) {
            self.state.lock().rate = rate;
        }
    }

    /// Scripted adaptive layer: sessions report what the script says the
    /// moment they attach, through their own event channel.
    enum Script {
        Manifest(Vec<QualityLevel>),
        FatalError,
        Silent,
    }

    struct FakeAdaptive {
        script: Box<dyn Fn(&str) -> Script + Send + Sync>,
        attached: Mutex<Vec<String>>,
        destroyed: Arc<Mutex<usize>>,
    }

    impl FakeAdaptive {
        fn new(script: impl Fn(&str) -> Script + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                script: Box::new(script),
                attached: Mutex::new(Vec::new()),
                destroyed: Arc::new(Mutex::new(0)),
            })
        }

        fn attach_log(&self) -> Vec<String> {
            self.attached.lock().clone()
        }

        fn destroyed_count(&self) -> usize {
            *self.destroyed.lock()
        }
    }

    struct FakeAdaptiveSession {
        destroyed: Arc<Mutex<usize>>,
        level: Option<usize>,
        levels: Vec<QualityLevel>,
    }

    impl AdaptiveSession for FakeAdaptiveSession {
        fn levels(&self) -> Vec<QualityLevel> {
            self.levels.clone()
        }

        fn current_level(&self) -> Option<usize> {
            self.level
        }

        fn set_level(&mut self, level: Option<usize>) {
            self.level = level;
        }

        fn start_load(&mut self) {}

        fn recover_media(&mut self) {}

        fn destroy(&mut self) {
            *self.destroyed.lock() += 1;
        }
    }

    impl AdaptiveFactory for FakeAdaptive {
        fn attach(
            &self,
            _sink: Arc<dyn MediaSink>,
            manifest_url: &str,
            _rewrite: UrlRewriter,
            events: flume::Sender<MediaEvent>,
        ) -> Box<dyn AdaptiveSession> {
            self.attached.lock().push(manifest_url.to_string());
            let mut levels = Vec::new();
            match (self.script)(manifest_url) {
                Script::Manifest(manifest_levels) => {
                    levels = manifest_levels.clone();
                    let _ = events.send(MediaEvent::ManifestReady {
                        levels: manifest_levels,
                    });
                }
                Script::FatalError => {
                    let _ = events.send(MediaEvent::Error(StreamError::new(
                        StreamErrorKind::Fatal,
                        "upstream gone",
                    )));
                }
                Script::Silent => {}
            }
            Box::new(FakeAdaptiveSession {
                destroyed: self.destroyed.clone(),
                level: None,
                levels,
            })
        }
    }

    // -- harness --------------------------------------------------------------

    struct Harness {
        engine: PlaybackEngine,
        sink: Arc<FakeSink>,
        adaptive: Arc<FakeAdaptive>,
        candidates: Arc<CandidateList>,
        events: flume::Receiver<PlayerEvent>,
        prefs: Arc<PreferenceStore>,
    }

    async fn harness(script: impl Fn(&str) -> Script + Send + Sync + 'static) -> Harness {
        let sink = Arc::new(FakeSink::default());
        let adaptive = FakeAdaptive::new(script);
        let candidates = Arc::new(CandidateList::new());
        let prefs = Arc::new(PreferenceStore::open(Arc::new(MemoryStore::new())).await);
        let backend = Arc::new(BackendClient::new(&BackendConfig::default()).unwrap());
        let (tx, rx) = flume::unbounded();

        let engine = PlaybackEngine::new(
            sink.clone(),
            adaptive.clone(),
            Arc::new(ProxyAdapter::new("/proxy_stream")),
            backend,
            prefs.clone(),
            candidates.clone(),
            PlayerConfig::default(),
            tx,
        );

        Harness {
            engine,
            sink,
            adaptive,
            candidates,
            events: rx,
            prefs,
        }
    }

    fn hls_descriptor(source: &str) -> StreamDescriptor {
        StreamDescriptor {
            source: source.to_string(),
            embed: None,
            stream: StreamSource::Hls {
                playlist: format!("https://cdn.example/{}/master.m3u8", source),
                headers: StreamHeaders::default(),
                captions: Vec::new(),
            },
        }
    }

    fn file_descriptor(source: &str) -> StreamDescriptor {
        StreamDescriptor {
            source: source.to_string(),
            embed: None,
            stream: StreamSource::File {
                qualities: vec![
                    QualityOption {
                        quality: "720".to_string(),
                        url: format!("https://cdn.example/{}/720.mp4", source),
                    },
                    QualityOption {
                        quality: "1080".to_string(),
                        url: format!("https://cdn.example/{}/1080.mp4", source),
                    },
                ],
                headers: StreamHeaders::default(),
                captions: Vec::new(),
            },
        }
    }

    async fn settle() {
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }
    }

    // -- tests ----------------------------------------------------------------

    #[test]
    fn qualities_sort_best_first_with_unknown_last() {
        let sorted = sort_qualities(vec![
            QualityOption {
                quality: "unknown".into(),
                url: "u".into(),
            },
            QualityOption {
                quality: "720".into(),
                url: "a".into(),
            },
            QualityOption {
                quality: "1080".into(),
                url: "b".into(),
            },
        ]);
        let order: Vec<&str> = sorted.iter().map(|q| q.quality.as_str()).collect();
        assert_eq!(order, vec!["1080", "720", "unknown"]);
    }

    #[test]
    fn preferred_rung_wins_when_available() {
        let sorted = sort_qualities(vec![
            QualityOption {
                quality: "720".into(),
                url: "a".into(),
            },
            QualityOption {
                quality: "1080".into(),
                url: "b".into(),
            },
        ]);
        assert_eq!(pick_file_quality("720", &sorted).unwrap().quality, "720");
        assert_eq!(pick_file_quality("480", &sorted).unwrap().quality, "1080");
        assert_eq!(pick_file_quality("auto", &sorted).unwrap().quality, "1080");
    }

    #[tokio::test]
    async fn manifest_ready_moves_loading_to_ready_and_plays() {
        let h = harness(|_| Script::Manifest(vec![QualityLevel { height: 1080 }])).await;
        let d = h.candidates.push(hls_descriptor("alpha")).unwrap();
        h.engine.load_stream(d).await;
        settle().await;

        assert_eq!(h.engine.state().await, PlaybackState::Ready);
        assert!(h.sink.state.lock().playing);
        // Manifest arrival disarms the load-timeout guard.
        assert!(!h.engine.has_pending_timers().await);
    }

    #[tokio::test]
    async fn fatal_errors_walk_the_candidate_list_in_order_once_each() {
        let h = harness(|url| {
            if url.contains("bad") {
                Script::FatalError
            } else {
                Script::Manifest(vec![QualityLevel { height: 720 }])
            }
        })
        .await;

        h.candidates.push(hls_descriptor("bad-one"));
        h.candidates.push(hls_descriptor("bad-two"));
        h.candidates.push(hls_descriptor("good"));
        let first = h.candidates.first().unwrap();

        h.engine.load_stream(first).await;
        settle().await;

        assert_eq!(h.engine.state().await, PlaybackState::Ready);
        assert_eq!(
            h.engine.current_descriptor().await.unwrap().source,
            "good"
        );

        let log = h.adaptive.attach_log();
        assert_eq!(log.len(), 3);
        assert!(log[0].contains("bad-one"));
        assert!(log[1].contains("bad-two"));
        assert!(log[2].contains("good"));

        // Each failed attachment was torn down before the next was built.
        assert_eq!(h.adaptive.destroyed_count(), 2);
    }

    #[tokio::test]
    async fn exhausting_every_candidate_is_terminal() {
        let h = harness(|_| Script::FatalError).await;
        h.candidates.push(hls_descriptor("bad-one"));
        h.candidates.push(hls_descriptor("bad-two"));
        let first = h.candidates.first().unwrap();

        h.engine.load_stream(first).await;
        settle().await;

        assert_eq!(
            h.engine.state().await,
            PlaybackState::Error { fatal: true }
        );
        let events: Vec<PlayerEvent> = h.events.drain().collect();
        assert!(
            events
                .iter()
                .any(|e| matches!(e, PlayerEvent::AllSourcesFailed {}))
        );
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, PlayerEvent::SourceFailed { .. }))
                .count(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn load_timeout_advances_and_rearms_the_guard() {
        let h = harness(|_| Script::Silent).await;
        h.candidates.push(hls_descriptor("slow-a"));
        h.candidates.push(hls_descriptor("slow-b"));
        let first = h.candidates.first().unwrap();

        h.engine.load_stream(first).await;
        settle().await;
        assert_eq!(h.engine.state().await, PlaybackState::Loading);

        tokio::time::advance(std::time::Duration::from_millis(20_500)).await;
        settle().await;

        assert_eq!(h.engine.current_descriptor().await.unwrap().source, "slow-b");
        assert_eq!(h.engine.state().await, PlaybackState::Loading);
        assert!(h.engine.has_pending_timers().await);

        // Second expiry exhausts the list.
        tokio::time::advance(std::time::Duration::from_millis(20_500)).await;
        settle().await;
        assert_eq!(
            h.engine.state().await,
            PlaybackState::Error { fatal: true }
        );
        assert!(!h.engine.has_pending_timers().await);
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_leaves_no_timers() {
        let h = harness(|_| Script::Silent).await;

        // Destroy with no prior load is a no-op.
        h.engine.destroy().await;
        h.engine.destroy().await;
        assert!(!h.engine.has_pending_timers().await);

        let h = harness(|_| Script::Silent).await;
        let d = h.candidates.push(hls_descriptor("alpha")).unwrap();
        h.engine.load_stream(d).await;
        assert!(h.engine.has_pending_timers().await);

        h.engine.destroy().await;
        h.engine.destroy().await;
        assert!(!h.engine.has_pending_timers().await);
        assert!(h.sink.source().is_none());
    }

    #[tokio::test]
    async fn file_streams_play_immediately_on_best_rung() {
        let h = harness(|_| Script::Silent).await;
        let d = h.candidates.push(file_descriptor("files")).unwrap();
        h.engine.load_stream(d).await;

        let source = h.sink.source().unwrap();
        assert!(source.starts_with("/proxy_stream?url="));
        assert!(source.contains("1080.mp4"));
        assert!(h.sink.state.lock().playing);
    }

    #[tokio::test]
    async fn file_quality_switch_preserves_position_and_persists() {
        let h = harness(|_| Script::Silent).await;
        let d = h.candidates.push(file_descriptor("files")).unwrap();
        h.engine.load_stream(d).await;
        h.engine.handle_media_event(MediaEvent::Playing).await;

        h.sink.set_duration(5400.0);
        h.sink.force_position(1234.5);

        h.engine.set_file_quality("720").await;

        let source = h.sink.source().unwrap();
        assert!(source.contains("720.mp4"));
        assert!((h.sink.position() - 1234.5).abs() <= 1.0);
        assert!(h.sink.state.lock().playing);
        assert_eq!(h.prefs.current().preferred_quality, "720");
    }

    #[tokio::test]
    async fn progress_tick_reports_played_and_buffered_fractions() {
        let h = harness(|_| Script::Silent).await;
        let d = h.candidates.push(file_descriptor("files")).unwrap();
        h.engine.load_stream(d).await;
        h.sink.set_duration(100.0);
        h.sink.force_position(25.0);
        h.sink.set_buffered(50.0);

        h.engine.handle_media_event(MediaEvent::TimeUpdate).await;

        let tick = h
            .events
            .drain()
            .find(|e| matches!(e, PlayerEvent::ProgressTick { .. }))
            .unwrap();
        match tick {
            PlayerEvent::ProgressTick {
                played, buffered, ..
            } => {
                assert!((played - 0.25).abs() < 1e-9);
                assert!((buffered - 0.5).abs() < 1e-9);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn scrubbing_suppresses_ticks_and_applies_on_release() {
        let h = harness(|_| Script::Silent).await;
        let d = h.candidates.push(file_descriptor("files")).unwrap();
        h.engine.load_stream(d).await;
        h.sink.set_duration(200.0);
        h.events.drain().count();

        h.engine.begin_scrub().await;
        h.engine.scrub_to(0.25).await;
        h.engine.handle_media_event(MediaEvent::TimeUpdate).await;
        assert!(
            !h.events
                .drain()
                .any(|e| matches!(e, PlayerEvent::ProgressTick { .. }))
        );

        h.engine.scrub_to(1.75).await; // clamped
        h.engine.end_scrub().await;
        assert_eq!(h.sink.position(), 200.0);
    }

    #[tokio::test]
    async fn caption_document_renders_stacked_cues_with_offset() {
        let h = harness(|_| Script::Silent).await;
        let d = h.candidates.push(file_descriptor("files")).unwrap();
        h.engine.load_stream(d).await;
        h.sink.set_duration(100.0);

        let doc = "00:00:10,000 --> 00:00:20,000\n<b>first</b>\n\n00:00:15,000 --> 00:00:25,000\nsecond\n";
        h.engine
            .set_caption_document(
                Caption {
                    lang: "en".to_string(),
                    url: "https://subs.example/en.srt".to_string(),
                },
                doc,
            )
            .await;

        h.sink.force_position(17.0);
        assert_eq!(
            h.engine.visible_cues().await,
            vec!["<b>first</b>".to_string(), "second".to_string()]
        );

        // Shifting the offset moves the window.
        h.engine.set_caption_offset(-10.0).await;
        h.sink.force_position(22.0);
        assert_eq!(h.engine.visible_cues().await, vec!["<b>first</b>".to_string()]);
    }

    #[tokio::test]
    async fn stale_caption_documents_are_dropped_after_candidate_switch() {
        let h = harness(|_| Script::Silent).await;
        h.candidates.push(file_descriptor("one"));
        h.candidates.push(file_descriptor("two"));
        let first = h.candidates.first().unwrap();

        h.engine.load_stream(first).await;
        let stale_generation = 1;

        let second = h
            .candidates
            .next_after(&h.engine.current_descriptor().await.unwrap().id())
            .unwrap();
        h.engine.load_stream(second).await;

        h.engine
            .install_caption_document(
                stale_generation,
                Caption {
                    lang: "en".to_string(),
                    url: "https://subs.example/en.srt".to_string(),
                },
                "00:00:01,000 --> 00:00:02,000\nstale\n",
            )
            .await;

        assert!(h.engine.visible_cues().await.is_empty());
    }

    #[tokio::test]
    async fn media_errors_recover_in_place_without_switching() {
        let h = harness(|_| Script::Silent).await;
        h.candidates.push(file_descriptor("solo"));
        let d = h.candidates.first().unwrap();
        h.engine.load_stream(d).await;
        h.engine.handle_media_event(MediaEvent::Playing).await;
        h.sink.force_position(300.0);

        h.engine
            .handle_media_event(MediaEvent::Error(StreamError::new(
                StreamErrorKind::Media,
                "decode glitch",
            )))
            .await;

        // Still on the same candidate, position restored for the reload.
        assert_eq!(h.engine.current_descriptor().await.unwrap().source, "solo");
        assert!((h.sink.position() - 300.0).abs() <= 1.0);
        assert_eq!(h.adaptive.attach_log().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_escalate_after_bounded_retries() {
        let h = harness(|_| Script::Silent).await;
        h.candidates.push(file_descriptor("flaky"));
        h.candidates.push(file_descriptor("backup"));
        let d = h.candidates.first().unwrap();
        h.engine.load_stream(d).await;
        h.engine.handle_media_event(MediaEvent::Playing).await;

        let max = PlayerConfig::default().network_retry.max_retries;
        for _ in 0..=max {
            h.engine
                .handle_media_event(MediaEvent::Error(StreamError::new(
                    StreamErrorKind::Network,
                    "segment fetch failed",
                )))
                .await;
            settle().await;
        }

        // The retry budget is spent; the extra error switched candidates.
        assert_eq!(
            h.engine.current_descriptor().await.unwrap().source,
            "backup"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_probe_escalates_when_playback_never_resumes() {
        let h = harness(|_| Script::Silent).await;
        h.candidates.push(file_descriptor("flaky"));
        h.candidates.push(file_descriptor("backup"));
        let d = h.candidates.first().unwrap();
        h.engine.load_stream(d).await;
        h.engine.handle_media_event(MediaEvent::Playing).await;

        h.engine
            .handle_media_event(MediaEvent::Error(StreamError::new(
                StreamErrorKind::Network,
                "segment fetch failed",
            )))
            .await;
        assert_eq!(
            h.engine.state().await,
            PlaybackState::Error { fatal: false }
        );

        tokio::time::advance(std::time::Duration::from_millis(
            PlayerConfig::default().recovery_wait_ms + 500,
        ))
        .await;
        settle().await;

        assert_eq!(
            h.engine.current_descriptor().await.unwrap().source,
            "backup"
        );
    }

    #[tokio::test]
    async fn pinned_preference_is_applied_when_manifest_offers_it() {
        let h = harness(|_| {
            Script::Manifest(vec![
                QualityLevel { height: 1080 },
                QualityLevel { height: 720 },
            ])
        })
        .await;
        h.prefs
            .update(|p| p.preferred_quality = "720".to_string())
            .await;

        let d = h.candidates.push(hls_descriptor("alpha")).unwrap();
        h.engine.load_stream(d).await;
        settle().await;

        assert_eq!(h.engine.state().await, PlaybackState::Ready);
        let (levels, _) = h.engine.quality_menu().await;
        assert_eq!(levels.len(), 2);
    }
}

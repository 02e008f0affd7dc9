use std::sync::Arc;

use tokio::task::JoinHandle;

use super::media::{AdaptiveSession, QualityLevel};
use super::state::PlaybackState;
use crate::api::models::{Caption, QualityOption};
use crate::hunter::StreamDescriptor;
use crate::subtitles::Cue;

/// Mutable state of one playback engine. Everything in here is guarded by
/// the engine's session mutex; the struct itself only knows how to tear its
/// resources down.
pub struct PlayerContext {
    pub state: PlaybackState,
    pub current: Option<Arc<StreamDescriptor>>,
    /// Bumped on every load attempt. Timers and background fetches capture
    /// the generation they were armed under and no-op once it moves on.
    pub generation: u64,
    /// Guards the advance-to-next-candidate path against reentrancy.
    pub advancing: bool,
    pub destroyed: bool,

    pub adaptive: Option<Box<dyn AdaptiveSession>>,
    pub adaptive_levels: Vec<QualityLevel>,
    pub adaptive_pump: Option<JoinHandle<()>>,

    /// Renditions of the active file-type stream, best first.
    pub file_qualities: Vec<QualityOption>,
    pub file_quality: Option<String>,
    /// Proxied URL currently loaded into the sink for file-type streams.
    pub file_url: Option<String>,

    pub cues: Vec<Cue>,
    pub caption_offset: f64,
    pub active_caption: Option<Caption>,
    pub visible_lines: Vec<String>,

    pub scrubbing: bool,
    pub scrub_target: Option<f64>,

    pub network_retries: u32,
    pub load_timeout: Option<JoinHandle<()>>,
    pub recovery_probe: Option<JoinHandle<()>>,
    pub caption_task: Option<JoinHandle<()>>,
}

impl PlayerContext {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Idle,
            current: None,
            generation: 0,
            advancing: false,
            destroyed: false,
            adaptive: None,
            adaptive_levels: Vec::new(),
            adaptive_pump: None,
            file_qualities: Vec::new(),
            file_quality: None,
            file_url: None,
            cues: Vec::new(),
            caption_offset: 0.0,
            active_caption: None,
            visible_lines: Vec::new(),
            scrubbing: false,
            scrub_target: None,
            network_retries: 0,
            load_timeout: None,
            recovery_probe: None,
            caption_task: None,
        }
    }

    /// Tear down the adaptive attachment and its event pump. Idempotent,
    /// safe to call with nothing attached. Attachments never overlap: this
    /// always runs before a new one is constructed.
    pub fn teardown_attachment(&mut self) {
        if let Some(mut session) = self.adaptive.take() {
            session.destroy();
        }
        if let Some(pump) = self.adaptive_pump.take() {
            pump.abort();
        }
        self.adaptive_levels.clear();
    }

    /// Disarm the load-timeout guard and the recovery probe. Entered-Ready,
    /// first-fragment and playing-resumed paths all route through here.
    pub fn cancel_load_guards(&mut self) {
        if let Some(guard) = self.load_timeout.take() {
            guard.abort();
        }
        if let Some(probe) = self.recovery_probe.take() {
            probe.abort();
        }
    }

    pub fn cancel_timers(&mut self) {
        self.cancel_load_guards();
        if let Some(task) = self.caption_task.take() {
            task.abort();
        }
    }

    pub fn reset_captions(&mut self) {
        self.cues.clear();
        self.active_caption = None;
        self.visible_lines.clear();
        // The user's caption offset is a session-level adjustment and
        // survives candidate switches.
    }

    pub fn has_pending_timers(&self) -> bool {
        self.load_timeout.is_some() || self.recovery_probe.is_some() || self.caption_task.is_some()
    }
}

impl Default for PlayerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PlayerContext {
    fn drop(&mut self) {
        self.cancel_timers();
        self.teardown_attachment();
    }
}

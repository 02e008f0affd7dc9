use serde::Serialize;

/// Playback session state machine.
///
/// ```text
/// Idle → Loading → Ready → Playing ⇄ Paused → Ended
///          ↑  ↘________________↘
///          │         Error(recoverable | fatal)
///          └── advance-to-next-candidate
/// ```
///
/// `Error { fatal: false }` marks an in-place recovery in progress on the
/// current candidate. `Error { fatal: true }` is terminal for the session:
/// every candidate was tried, or none ever existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum PlaybackState {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Ended,
    #[serde(rename_all = "camelCase")]
    Error { fatal: bool },
}

impl PlaybackState {
    /// States in which a load attempt is still waiting for first light.
    /// The load-timeout guard only fires here.
    pub fn awaiting_playback(&self) -> bool {
        matches!(
            self,
            Self::Loading | Self::Ready | Self::Error { fatal: false }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Error { fatal: true })
    }
}

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::KvStore;
use crate::common::{MediaId, MediaKind};

/// Key prefix of per-media progress records.
pub const PROGRESS_KEY_PREFIX: &str = "nautilus_progress";

pub fn progress_key(kind: MediaKind, media_id: &MediaId) -> String {
    format!("{}_{}_{}", PROGRESS_KEY_PREFIX, kind, media_id)
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Resume-on-reopen snapshot for one media unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    /// Playback position in seconds.
    pub time: f64,
    /// Known duration in seconds at snapshot time.
    pub duration: f64,
    /// `time / duration`, clamped to [0, 1].
    pub percentage: f64,
    /// Unix timestamp in milliseconds.
    pub updated_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
}

/// Writes position snapshots for one `(kind, media id)` target.
pub struct ProgressSink {
    store: Arc<dyn KvStore>,
    key: String,
    season: Option<u32>,
    episode: Option<u32>,
}

impl ProgressSink {
    pub fn new(
        store: Arc<dyn KvStore>,
        kind: MediaKind,
        media_id: &MediaId,
        season: Option<u32>,
        episode: Option<u32>,
    ) -> Self {
        Self {
            store,
            key: progress_key(kind, media_id),
            season,
            episode,
        }
    }

    pub async fn save(&self, time: f64, duration: f64) {
        if !duration.is_finite() || duration <= 0.0 {
            return;
        }

        let record = ProgressRecord {
            time,
            duration,
            percentage: (time / duration).clamp(0.0, 1.0),
            updated_at: now_ms(),
            season: self.season,
            episode: self.episode,
        };

        match serde_json::to_value(&record) {
            Ok(value) => {
                if let Err(e) = self.store.put(&self.key, value).await {
                    warn!("failed to persist progress: {}", e);
                }
            }
            Err(e) => warn!("failed to serialize progress: {}", e),
        }
    }

    /// Last saved snapshot for a media unit, if any.
    pub async fn load(
        store: &Arc<dyn KvStore>,
        kind: MediaKind,
        media_id: &MediaId,
    ) -> Option<ProgressRecord> {
        let value = store.get(&progress_key(kind, media_id)).await?;
        serde_json::from_value(value).ok()
    }
}

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::KvStore;

/// Record key of the player preference document.
pub const PREFS_KEY: &str = "nautilus_player_prefs";

/// User playback preferences, persisted as one record. Unknown or missing
/// fields fall back to defaults so older documents keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerPrefs {
    pub volume: f32,
    pub autoplay_subtitles: bool,
    /// `"auto"` or a vertical resolution rendered as a string (`"1080"`).
    pub preferred_quality: String,
    pub subtitle_size: f32,
    pub subtitle_bg_opacity: f32,
    pub subtitle_bold: bool,
    pub subtitle_color: String,
}

impl Default for PlayerPrefs {
    fn default() -> Self {
        Self {
            volume: 1.0,
            autoplay_subtitles: true,
            preferred_quality: "auto".to_string(),
            subtitle_size: 1.0,
            subtitle_bg_opacity: 0.75,
            subtitle_bold: false,
            subtitle_color: "#ffffff".to_string(),
        }
    }
}

/// Read-once, write-through preference access for one player instance.
///
/// The record is loaded at construction and cached; every change merges into
/// the cache and replaces the stored record whole.
pub struct PreferenceStore {
    store: Arc<dyn KvStore>,
    cached: Mutex<PlayerPrefs>,
}

impl PreferenceStore {
    pub async fn open(store: Arc<dyn KvStore>) -> Self {
        let cached = match store.get(PREFS_KEY).await {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("preference record unreadable, using defaults: {}", e);
                PlayerPrefs::default()
            }),
            None => PlayerPrefs::default(),
        };

        Self {
            store,
            cached: Mutex::new(cached),
        }
    }

    pub fn current(&self) -> PlayerPrefs {
        self.cached.lock().clone()
    }

    /// Apply a change and persist the merged record.
    pub async fn update(&self, apply: impl FnOnce(&mut PlayerPrefs)) -> PlayerPrefs {
        let merged = {
            let mut cached = self.cached.lock();
            apply(&mut cached);
            cached.clone()
        };

        match serde_json::to_value(&merged) {
            Ok(value) => {
                if let Err(e) = self.store.put(PREFS_KEY, value).await {
                    warn!("failed to persist preferences: {}", e);
                }
            }
            Err(e) => warn!("failed to serialize preferences: {}", e),
        }

        merged
    }
}

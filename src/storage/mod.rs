use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::common::PlayerError;

pub mod prefs;
pub mod progress;

pub use prefs::{PlayerPrefs, PreferenceStore};
pub use progress::{ProgressRecord, ProgressSink};

/// Durable key-value store for player state. Keys are namespaced by the
/// caller; values are JSON documents written whole (merge-and-replace,
/// never appended).
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn put(&self, key: &str, value: Value) -> Result<(), PlayerError>;
}

/// Single-file JSON store: one object document mapping keys to records.
///
/// Every `put` rewrites the whole document, which keeps the on-disk shape
/// trivially inspectable and crash-consistent enough for preference-sized
/// data.
pub struct JsonFileStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, Value>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cache = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, Value>>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!("store document at {:?} is corrupt, starting fresh: {}", path, e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            path,
            cache: Mutex::new(cache),
        }
    }

    fn flush(&self, snapshot: &HashMap<String, Value>) -> Result<(), PlayerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let doc = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&self.path, doc)?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for JsonFileStore {
    async fn get(&self, key: &str) -> Option<Value> {
        self.cache.lock().get(key).cloned()
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), PlayerError> {
        let snapshot = {
            let mut cache = self.cache.lock();
            cache.insert(key.to_string(), value);
            cache.clone()
        };
        self.flush(&snapshot)
    }
}

/// In-memory store for tests and embedders that persist elsewhere.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<Value> {
        self.map.lock().get(key).cloned()
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), PlayerError> {
        self.map.lock().insert(key.to_string(), value);
        Ok(())
    }
}

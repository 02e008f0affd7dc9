use serde::{Deserialize, Serialize};

/// Location of the durable key-value document holding player preferences
/// and per-media progress records.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
        }
    }
}

fn default_path() -> String {
    "nautilus_store.json".to_string()
}

use serde::{Deserialize, Serialize};

/// Where the aggregator backend lives and how the core reaches it.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Same-origin endpoint that forwards upstream media requests together
    /// with their required Referer/Origin headers.
    #[serde(default = "default_proxy_endpoint")]
    pub proxy_endpoint: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            proxy_endpoint: default_proxy_endpoint(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_proxy_endpoint() -> String {
    "/proxy_stream".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

use serde::{Deserialize, Serialize};

/// One provider result as returned by the backend scraper endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEnvelope {
    /// Provider identifier.
    pub source: String,
    /// Secondary identifier when the provider wraps another provider's embed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<String>,
    pub stream: StreamPayload,
}

/// The playable payload of a provider result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamPayload {
    #[serde(rename_all = "camelCase")]
    Hls {
        playlist: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<StreamHeaders>,
        #[serde(default)]
        captions: Vec<Caption>,
    },
    #[serde(rename_all = "camelCase")]
    File {
        qualities: Vec<QualityOption>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<StreamHeaders>,
        #[serde(default)]
        captions: Vec<Caption>,
    },
}

/// Upstream-required request headers a client cannot set directly. They are
/// forwarded through the same-origin proxy instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHeaders {
    #[serde(rename = "Referer", default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    #[serde(rename = "Origin", default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl StreamHeaders {
    pub fn is_empty(&self) -> bool {
        self.referer.is_none() && self.origin.is_none()
    }
}

/// One pre-encoded rendition of a file-type stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityOption {
    /// Vertical resolution as a string, or `"unknown"`.
    pub quality: String,
    pub url: String,
}

/// A subtitle track offered by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caption {
    pub lang: String,
    pub url: String,
}

/// Response of the full multi-provider scan.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HuntResponse {
    #[serde(default)]
    pub streams: Vec<StreamEnvelope>,
}

/// Response of the provider roster endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersResponse {
    #[serde(default)]
    pub sources: Vec<ProviderInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub disabled: bool,
}

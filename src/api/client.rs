use tracing::{debug, error, trace};

use crate::{
    api::models::{HuntResponse, ProviderInfo, ProvidersResponse, StreamEnvelope},
    common::{HttpClient, MediaId, MediaKind},
    configs::BackendConfig,
};

/// HTTP client for the aggregator backend's stream endpoints.
///
/// Every call fails closed: transport errors, bad statuses and undecodable
/// bodies all collapse to "no data". Callers only ever distinguish between
/// data and absence.
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: HttpClient::new(config.request_timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn stream_url(
        &self,
        prefix: &str,
        kind: MediaKind,
        media_id: &MediaId,
        season: Option<u32>,
        episode: Option<u32>,
    ) -> String {
        let mut url = format!("{}/{}/{}/{}", self.base_url, prefix, kind, media_id);
        let mut query = Vec::new();
        if let Some(season) = season {
            query.push(format!("season={}", season));
        }
        if let Some(episode) = episode {
            query.push(format!("episode={}", episode));
        }
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }

    /// Fast single-provider lookup against the backend's best-guess provider.
    pub async fn fetch_fast(
        &self,
        kind: MediaKind,
        media_id: &MediaId,
        season: Option<u32>,
        episode: Option<u32>,
    ) -> Option<StreamEnvelope> {
        let url = self.stream_url("stream", kind, media_id, season, episode);
        trace!("fast lookup: {}", url);

        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("fast lookup request failed: {}", e);
                return None;
            }
        };

        if !resp.status().is_success() {
            debug!("fast lookup returned status {}", resp.status());
            return None;
        }

        match resp.json::<StreamEnvelope>().await {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                debug!("fast lookup body not usable: {}", e);
                None
            }
        }
    }

    /// Full multi-provider scan. Substantially slower than `fetch_fast`;
    /// returns whatever the backend's providers managed to scrape.
    pub async fn fetch_all(
        &self,
        kind: MediaKind,
        media_id: &MediaId,
        season: Option<u32>,
        episode: Option<u32>,
    ) -> Vec<StreamEnvelope> {
        let url = self.stream_url("stream/hunt", kind, media_id, season, episode);
        trace!("full scan: {}", url);

        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                error!("full scan request failed: {}", e);
                return Vec::new();
            }
        };

        if !resp.status().is_success() {
            error!("full scan returned status {}", resp.status());
            return Vec::new();
        }

        match resp.json::<HuntResponse>().await {
            Ok(hunt) => hunt.streams,
            Err(e) => {
                error!("full scan body not usable: {}", e);
                Vec::new()
            }
        }
    }

    /// Provider roster, used to report per-provider scan status.
    pub async fn fetch_providers(&self) -> Vec<ProviderInfo> {
        let url = format!("{}/stream/providers", self.base_url);

        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("provider roster request failed: {}", e);
                return Vec::new();
            }
        };

        match resp.json::<ProvidersResponse>().await {
            Ok(body) => body.sources,
            Err(_) => Vec::new(),
        }
    }

    /// Fetch a subtitle document as plain text. The caller decides whether
    /// the URL needs to go through the proxy first.
    pub async fn fetch_caption(&self, url: &str) -> Option<String> {
        let resp = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("caption fetch failed: {}", e);
                return None;
            }
        };

        if !resp.status().is_success() {
            return None;
        }

        resp.text().await.ok()
    }
}

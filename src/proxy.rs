use crate::api::models::StreamHeaders;

/// Rewrites upstream media URLs to go through the same-origin proxy
/// endpoint, carrying the upstream-required headers as query parameters.
///
/// The rewrite is applied uniformly: top-level manifests and file URLs,
/// every sub-resource the adaptive layer requests (variant playlists,
/// segments, key files) and cross-origin subtitle documents.
#[derive(Debug, Clone)]
pub struct ProxyAdapter {
    endpoint: String,
}

impl ProxyAdapter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Wrap `raw_url` into a proxied same-origin URL. Already-proxied URLs
    /// pass through unchanged.
    pub fn proxied(&self, raw_url: &str, headers: Option<&StreamHeaders>) -> String {
        if raw_url.starts_with(&self.endpoint) {
            return raw_url.to_string();
        }

        let mut url = format!("{}?url={}", self.endpoint, urlencoding::encode(raw_url));
        if let Some(headers) = headers {
            if let Some(referer) = &headers.referer {
                url.push_str(&format!("&referer={}", urlencoding::encode(referer)));
            }
            if let Some(origin) = &headers.origin {
                url.push_str(&format!("&origin={}", urlencoding::encode(origin)));
            }
        }
        url
    }

    /// Proxy a subtitle/track URL only when it actually leaves the embedding
    /// origin: absolute http(s) URLs and anything that needs forced headers.
    /// Relative same-origin URLs pass through untouched.
    pub fn maybe_proxied(&self, raw_url: &str, headers: Option<&StreamHeaders>) -> String {
        let cross_origin = raw_url.starts_with("http://") || raw_url.starts_with("https://");
        let forced_headers = headers.map(|h| !h.is_empty()).unwrap_or(false);
        if cross_origin || forced_headers {
            self.proxied(raw_url, headers)
        } else {
            raw_url.to_string()
        }
    }
}

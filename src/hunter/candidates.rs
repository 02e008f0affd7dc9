use std::sync::Arc;

use parking_lot::Mutex;

use crate::api::models::{Caption, QualityOption, StreamEnvelope, StreamHeaders, StreamPayload};

/// Identity of a candidate: `(source, embed)`. Two results with the same
/// identity are the same way to play the media, regardless of payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorId {
    pub source: String,
    pub embed: Option<String>,
}

impl std::fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.embed {
            Some(embed) => write!(f, "{} → {}", self.source, embed),
            None => f.write_str(&self.source),
        }
    }
}

/// One way to play the current media unit, normalized from a provider
/// response. Immutable once created; shared through the candidate list for
/// the lifetime of a playback session.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub source: String,
    pub embed: Option<String>,
    pub stream: StreamSource,
}

#[derive(Debug, Clone)]
pub enum StreamSource {
    Hls {
        playlist: String,
        headers: StreamHeaders,
        captions: Vec<Caption>,
    },
    File {
        qualities: Vec<QualityOption>,
        headers: StreamHeaders,
        captions: Vec<Caption>,
    },
}

impl StreamDescriptor {
    pub fn from_envelope(envelope: StreamEnvelope) -> Self {
        let stream = match envelope.stream {
            StreamPayload::Hls {
                playlist,
                headers,
                captions,
            } => StreamSource::Hls {
                playlist,
                headers: headers.unwrap_or_default(),
                captions,
            },
            StreamPayload::File {
                qualities,
                headers,
                captions,
            } => StreamSource::File {
                qualities,
                headers: headers.unwrap_or_default(),
                captions,
            },
        };

        Self {
            source: envelope.source,
            embed: envelope.embed,
            stream,
        }
    }

    pub fn id(&self) -> DescriptorId {
        DescriptorId {
            source: self.source.clone(),
            embed: self.embed.clone(),
        }
    }

    pub fn headers(&self) -> &StreamHeaders {
        match &self.stream {
            StreamSource::Hls { headers, .. } => headers,
            StreamSource::File { headers, .. } => headers,
        }
    }

    pub fn captions(&self) -> &[Caption] {
        match &self.stream {
            StreamSource::Hls { captions, .. } => captions,
            StreamSource::File { captions, .. } => captions,
        }
    }
}

/// The ordered fallback list for one playback session.
///
/// Append-only, insertion-ordered by discovery, duplicates suppressed by
/// identity. The current playback position in the list is always derived by
/// identity lookup (never a stored index), so background appends can never
/// desync it.
#[derive(Default)]
pub struct CandidateList {
    inner: Mutex<Vec<Arc<StreamDescriptor>>>,
}

impl CandidateList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor unless its identity is already present.
    /// Returns the shared descriptor on insertion, `None` on duplicate.
    pub fn push(&self, descriptor: StreamDescriptor) -> Option<Arc<StreamDescriptor>> {
        let mut inner = self.inner.lock();
        let id = descriptor.id();
        if inner.iter().any(|d| d.id() == id) {
            return None;
        }
        let descriptor = Arc::new(descriptor);
        inner.push(descriptor.clone());
        Some(descriptor)
    }

    pub fn first(&self) -> Option<Arc<StreamDescriptor>> {
        self.inner.lock().first().cloned()
    }

    /// The next untried candidate after `current`, in list order.
    pub fn next_after(&self, current: &DescriptorId) -> Option<Arc<StreamDescriptor>> {
        let inner = self.inner.lock();
        let pos = inner.iter().position(|d| &d.id() == current)?;
        inner.get(pos + 1).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Arc<StreamDescriptor>> {
        self.inner.lock().clone()
    }
}

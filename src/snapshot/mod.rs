pub mod fallback;
pub mod resolver;
pub mod upstream;

use axum::body::Bytes;
use chrono::{DateTime, Utc};

pub use fallback::FallbackFile;
pub use resolver::{ResolveError, SnapshotResolver};
pub use upstream::{UpstreamClient, UpstreamError};

/// Where a freshly resolved snapshot came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Upstream,
    Fallback,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Upstream => "upstream",
            SourceKind::Fallback => "fallback",
        }
    }
}

/// An opaque weather snapshot plus where it was resolved from.
///
/// The payload is never parsed; it is forwarded byte for byte.
#[derive(Clone, Debug)]
pub struct ResolvedSnapshot {
    pub payload: Bytes,
    pub source: SourceKind,
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedSnapshot {
    pub fn new(payload: Bytes, source: SourceKind) -> Self {
        Self {
            payload,
            source,
            resolved_at: Utc::now(),
        }
    }
}

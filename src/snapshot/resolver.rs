use super::{FallbackFile, ResolvedSnapshot, SourceKind, UpstreamClient, UpstreamError};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("fallback snapshot {path:?} unavailable ({source}) after upstream failure: {upstream}")]
    FallbackUnavailable {
        path: PathBuf,
        upstream: UpstreamError,
        #[source]
        source: io::Error,
    },
}

/// Resolves a fresh snapshot: live feed first, local file on transport failure.
#[derive(Clone)]
pub struct SnapshotResolver {
    upstream: UpstreamClient,
    fallback: FallbackFile,
}

impl SnapshotResolver {
    pub fn new(upstream: UpstreamClient, fallback: FallbackFile) -> Self {
        Self { upstream, fallback }
    }

    pub async fn resolve(&self) -> Result<ResolvedSnapshot, ResolveError> {
        let upstream_err = match self.upstream.fetch().await {
            Ok(payload) => {
                tracing::debug!("Fetched {} bytes from {}", payload.len(), self.upstream.url());
                return Ok(ResolvedSnapshot::new(payload, SourceKind::Upstream));
            }
            Err(e) => e,
        };

        tracing::warn!(
            "Upstream {} unavailable ({}), reading fallback {}",
            self.upstream.url(),
            upstream_err,
            self.fallback.path().display()
        );

        match self.fallback.read().await {
            Ok(payload) => Ok(ResolvedSnapshot::new(payload, SourceKind::Fallback)),
            Err(source) => Err(ResolveError::FallbackUnavailable {
                path: self.fallback.path().to_path_buf(),
                upstream: upstream_err,
                source,
            }),
        }
    }
}

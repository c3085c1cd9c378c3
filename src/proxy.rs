use crate::cache::SharedCache;
use crate::snapshot::{ResolveError, ResolvedSnapshot, SnapshotResolver, SourceKind};
use axum::body::Bytes;
use std::time::Duration;
use tokio::sync::Mutex;

/// Where a served payload came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Cache,
    Upstream,
    Fallback,
}

impl From<SourceKind> for Origin {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Upstream => Origin::Upstream,
            SourceKind::Fallback => Origin::Fallback,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Served {
    pub payload: Bytes,
    pub origin: Origin,
}

impl From<ResolvedSnapshot> for Served {
    fn from(snapshot: ResolvedSnapshot) -> Self {
        Self {
            payload: snapshot.payload,
            origin: snapshot.source.into(),
        }
    }
}

/// Serves the current snapshot, going upstream at most once per TTL window
/// under steady load.
pub struct WeatherProxy {
    cache: SharedCache,
    resolver: SnapshotResolver,
    key: String,
    ttl: Duration,
    /// Present only when misses are coalesced.
    miss_lock: Option<Mutex<()>>,
}

impl WeatherProxy {
    pub fn new(cache: SharedCache, resolver: SnapshotResolver, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            cache,
            resolver,
            key: key.into(),
            ttl,
            miss_lock: None,
        }
    }

    /// Serialize misses so one resolution per window feeds every waiter.
    pub fn with_coalesced_misses(mut self) -> Self {
        self.miss_lock = Some(Mutex::new(()));
        self
    }

    pub fn cache_description(&self) -> String {
        self.cache.describe()
    }

    pub async fn current_weather(&self) -> Result<Served, ResolveError> {
        if let Some(payload) = self.cached().await {
            return Ok(Served {
                payload,
                origin: Origin::Cache,
            });
        }

        let Some(lock) = &self.miss_lock else {
            return self.refresh().await;
        };

        let _guard = lock.lock().await;
        // Another request may have filled the entry while we waited.
        if let Some(payload) = self.cached().await {
            return Ok(Served {
                payload,
                origin: Origin::Cache,
            });
        }
        self.refresh().await
    }

    /// Resolves straight from the sources, bypassing the cache entirely.
    pub async fn current_weather_uncached(&self) -> Result<Served, ResolveError> {
        Ok(self.resolver.resolve().await?.into())
    }

    async fn cached(&self) -> Option<Bytes> {
        match self.cache.get(&self.key).await {
            Ok(Some(payload)) => {
                tracing::debug!("Cache hit for {}", self.key);
                Some(payload)
            }
            Ok(None) => {
                tracing::debug!("Cache miss for {}", self.key);
                None
            }
            Err(e) => {
                tracing::warn!("Cache get failed for {}, resolving directly: {}", self.key, e);
                None
            }
        }
    }

    async fn refresh(&self) -> Result<Served, ResolveError> {
        let snapshot = self.resolver.resolve().await?;

        // Fallback data is pinned for the full TTL too.
        if let Err(e) = self
            .cache
            .set(&self.key, snapshot.payload.clone(), self.ttl)
            .await
        {
            tracing::warn!("Cache set failed for {}: {}", self.key, e);
        } else {
            tracing::debug!(
                "Cached {} bytes from {} (resolved {}) for {:?}",
                snapshot.payload.len(),
                snapshot.source.as_str(),
                snapshot.resolved_at.to_rfc3339(),
                self.ttl
            );
        }

        Ok(snapshot.into())
    }
}

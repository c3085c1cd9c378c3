pub mod memcached;
pub mod memory;
pub mod redis_cache;

use crate::config::Config;
use async_trait::async_trait;
use axum::body::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use self::memcached::MemcachedCache;
pub use self::memory::MemoryCache;
pub use self::redis_cache::RedisCache;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected cache reply: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

/// Key/value store shared by every proxy instance.
///
/// `get` and `set` are each atomic on their own; nothing coordinates a
/// get-miss with the set that follows it.
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError>;

    /// Human-readable backend name for logs and health output.
    fn describe(&self) -> String;
}

pub type SharedCache = Arc<dyn SnapshotCache>;

/// Expiry in whole seconds as the network backends take it: rounded up, never zero.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    (ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)).max(1)
}

/// Picks the backend named by `CACHE_URL`. No connection is opened here.
pub fn build_cache(config: &Config) -> anyhow::Result<SharedCache> {
    let url = config.cache_url.trim();

    let cache: SharedCache = if url.eq_ignore_ascii_case("memory") {
        Arc::new(MemoryCache::new())
    } else if url.starts_with("memcached://") {
        Arc::new(MemcachedCache::from_url(url, config.connect_timeout())?)
    } else if url.starts_with("redis://") || url.starts_with("rediss://") {
        Arc::new(RedisCache::new(url, config.connect_timeout())?)
    } else {
        anyhow::bail!(
            "CACHE_URL {:?} is not supported; use memory, memcached://host:port or redis://host:port",
            url
        );
    };

    tracing::info!("Using {} for the snapshot cache", cache.describe());
    Ok(cache)
}

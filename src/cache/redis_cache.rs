use super::{ttl_secs, CacheError, SnapshotCache};
use async_trait::async_trait;
use axum::body::Bytes;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::fmt;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::timeout;

/// Redis-backed cache.
/// The `ConnectionManager` is created on first use and reconnects on its own.
/// Connecting and every command are bounded by `op_timeout`.
pub struct RedisCache {
    client: redis::Client,
    conn_manager: OnceCell<ConnectionManager>,
    redis_url: String,
    op_timeout: Duration,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("redis_url", &self.redis_url)
            .field("op_timeout", &self.op_timeout)
            .field("connected", &self.conn_manager.initialized())
            .finish()
    }
}

impl RedisCache {
    pub fn new(redis_url: &str, op_timeout: Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            conn_manager: OnceCell::new(),
            redis_url: redis_url.to_string(),
            op_timeout,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        // A timed-out init leaves the cell empty, so the next call tries again.
        let init = self.conn_manager.get_or_try_init(|| async {
            tracing::info!("Connecting to redis at {}", self.redis_url);
            ConnectionManager::new(self.client.clone()).await
        });
        let manager = timeout(self.op_timeout, init)
            .await
            .map_err(|_| self.timed_out("connect"))?
            .map_err(|e| CacheError::Unavailable(format!("redis {}: {}", self.redis_url, e)))?;
        Ok(manager.clone())
    }

    fn timed_out(&self, op: &str) -> CacheError {
        CacheError::Unavailable(format!(
            "redis {} {} timed out after {:?}",
            self.redis_url, op, self.op_timeout
        ))
    }
}

fn setex_cmd(key: &str, value: &[u8], ttl: Duration) -> redis::Cmd {
    let mut cmd = redis::cmd("SETEX");
    cmd.arg(key).arg(ttl_secs(ttl)).arg(value);
    cmd
}

#[async_trait]
impl SnapshotCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let mut conn = self.connection().await?;
        let value = timeout(self.op_timeout, conn.get::<_, Option<Vec<u8>>>(key))
            .await
            .map_err(|_| self.timed_out("GET"))?
            .map_err(|e| CacheError::Unavailable(format!("redis GET {}: {}", key, e)))?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let cmd = setex_cmd(key, &value, ttl);
        timeout(self.op_timeout, cmd.query_async::<_, ()>(&mut conn))
            .await
            .map_err(|_| self.timed_out("SETEX"))?
            .map_err(|e| CacheError::Unavailable(format!("redis SETEX {}: {}", key, e)))
    }

    fn describe(&self) -> String {
        self.redis_url.clone()
    }
}

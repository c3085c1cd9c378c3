//! Minimal memcached client speaking the classic text protocol.
//!
//! Only `get` and `set` are needed. One idle connection is kept per cache.
//! A call takes it out of the slot, or opens its own when the slot is empty,
//! so concurrent calls never wait on each other's network I/O. A connection
//! is thrown away after any error and the next call reconnects.

use super::{ttl_secs, CacheError, SnapshotCache};
use async_trait::async_trait;
use axum::body::Bytes;
use reqwest::Url;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

const DEFAULT_PORT: u16 = 11211;
const MAX_KEY_LEN: usize = 250;
/// memcached's default item size limit.
const MAX_VALUE_LEN: usize = 1024 * 1024;
/// Larger exptimes are read by the server as absolute unix timestamps.
const MAX_RELATIVE_EXPTIME: u64 = 60 * 60 * 24 * 30;

pub struct MemcachedCache {
    addr: String,
    op_timeout: Duration,
    idle: Mutex<Option<BufStream<TcpStream>>>,
}

impl MemcachedCache {
    pub fn new(addr: impl Into<String>, op_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            op_timeout,
            idle: Mutex::new(None),
        }
    }

    /// Accepts `memcached://host[:port]`.
    pub fn from_url(url: &str, op_timeout: Duration) -> anyhow::Result<Self> {
        let parsed = Url::parse(url)?;
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| anyhow::anyhow!("memcached URL {:?} has no host", url))?;
        let port = parsed.port().unwrap_or(DEFAULT_PORT);
        Ok(Self::new(format!("{}:{}", host, port), op_timeout))
    }

    async fn checkout(&self) -> Result<BufStream<TcpStream>, CacheError> {
        // The guard is dropped before any network I/O starts.
        let pooled = self.idle.lock().await.take();
        if let Some(stream) = pooled {
            return Ok(stream);
        }

        tracing::debug!("Connecting to memcached at {}", self.addr);
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(BufStream::new(stream))
    }

    async fn checkin(&self, stream: BufStream<TcpStream>) {
        let mut idle = self.idle.lock().await;
        if idle.is_none() {
            *idle = Some(stream);
        }
    }

    fn timed_out(&self, op: &str) -> CacheError {
        CacheError::Unavailable(format!(
            "memcached {} {} timed out after {:?}",
            self.addr, op, self.op_timeout
        ))
    }
}

#[async_trait]
impl SnapshotCache for MemcachedCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        check_key(key)?;
        let op = async {
            let mut stream = self.checkout().await?;
            let value = get_on(&mut stream, key).await?;
            self.checkin(stream).await;
            Ok::<_, CacheError>(value)
        };
        timeout(self.op_timeout, op).await.map_err(|_| self.timed_out("get"))?
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        check_key(key)?;
        let op = async {
            let mut stream = self.checkout().await?;
            set_on(&mut stream, key, &value, exptime(ttl)).await?;
            self.checkin(stream).await;
            Ok::<_, CacheError>(())
        };
        timeout(self.op_timeout, op).await.map_err(|_| self.timed_out("set"))?
    }

    fn describe(&self) -> String {
        format!("memcached://{}", self.addr)
    }
}

async fn get_on<S>(stream: &mut S, key: &str) -> Result<Option<Bytes>, CacheError>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    stream.write_all(&encode_get(key)).await?;
    stream.flush().await?;
    read_get_reply(stream, key).await
}

async fn set_on<S>(stream: &mut S, key: &str, value: &[u8], exptime: u64) -> Result<(), CacheError>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    stream.write_all(&encode_set(key, value, exptime)).await?;
    stream.flush().await?;
    read_set_reply(stream).await
}

fn check_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() || key.len() > MAX_KEY_LEN || key.bytes().any(|b| b <= b' ' || b == 0x7f) {
        return Err(CacheError::Protocol(format!("invalid memcached key {:?}", key)));
    }
    Ok(())
}

/// Zero means "never expire" to memcached, which `ttl_secs` never returns.
fn exptime(ttl: Duration) -> u64 {
    ttl_secs(ttl).min(MAX_RELATIVE_EXPTIME)
}

fn encode_get(key: &str) -> Vec<u8> {
    format!("get {}\r\n", key).into_bytes()
}

fn encode_set(key: &str, value: &[u8], exptime: u64) -> Vec<u8> {
    let mut buf = format!("set {} 0 {} {}\r\n", key, exptime, value.len()).into_bytes();
    buf.extend_from_slice(value);
    buf.extend_from_slice(b"\r\n");
    buf
}

async fn read_line<R>(reader: &mut R) -> Result<String, CacheError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line).await? == 0 {
        return Err(CacheError::Unavailable("memcached closed the connection".to_string()));
    }
    if !line.ends_with(b"\r\n") {
        return Err(CacheError::Protocol("truncated reply line".to_string()));
    }
    line.truncate(line.len() - 2);
    String::from_utf8(line).map_err(|_| CacheError::Protocol("reply line is not UTF-8".to_string()))
}

fn server_error(line: &str) -> Option<CacheError> {
    if line == "ERROR" || line.starts_with("CLIENT_ERROR") || line.starts_with("SERVER_ERROR") {
        Some(CacheError::Protocol(line.to_string()))
    } else {
        None
    }
}

async fn read_get_reply<R>(reader: &mut R, key: &str) -> Result<Option<Bytes>, CacheError>
where
    R: AsyncBufRead + Unpin,
{
    let header = read_line(reader).await?;
    if header == "END" {
        return Ok(None);
    }
    if let Some(err) = server_error(&header) {
        return Err(err);
    }

    // VALUE <key> <flags> <bytes> [<cas unique>]
    let mut parts = header.split(' ');
    if parts.next() != Some("VALUE") || parts.next() != Some(key) {
        return Err(CacheError::Protocol(format!("unexpected get reply {:?}", header)));
    }
    let len: usize = parts
        .nth(1)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| CacheError::Protocol(format!("bad length in {:?}", header)))?;
    let block_len = len
        .checked_add(2)
        .filter(|_| len <= MAX_VALUE_LEN)
        .ok_or_else(|| CacheError::Protocol(format!("value length {} exceeds {}", len, MAX_VALUE_LEN)))?;

    let mut data = vec![0u8; block_len];
    reader.read_exact(&mut data).await?;
    if !data.ends_with(b"\r\n") {
        return Err(CacheError::Protocol("data block not terminated".to_string()));
    }
    data.truncate(len);

    let trailer = read_line(reader).await?;
    if trailer != "END" {
        return Err(CacheError::Protocol(format!("expected END, got {:?}", trailer)));
    }
    Ok(Some(Bytes::from(data)))
}

async fn read_set_reply<R>(reader: &mut R) -> Result<(), CacheError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader).await?;
    match line.as_str() {
        "STORED" => Ok(()),
        _ => Err(server_error(&line)
            .unwrap_or_else(|| CacheError::Protocol(format!("set not stored: {:?}", line)))),
    }
}

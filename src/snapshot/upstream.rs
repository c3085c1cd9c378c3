use crate::config::Config;
use axum::body::Bytes;
use reqwest::{Client, StatusCode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream answered with HTTP {0}")]
    Status(StatusCode),
}

/// Fetches the live snapshot from the weather station feed.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    url: String,
    strict_status: bool,
}

impl UpstreamClient {
    pub fn new(config: &Config) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .user_agent(concat!("WeatherSnapshotProxy/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            url: config.upstream_url.clone(),
            strict_status: config.upstream_strict_status,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the response body verbatim.
    ///
    /// Only transport failures are errors unless strict status checking is on,
    /// in which case any non-2xx status is rejected as well.
    pub async fn fetch(&self) -> Result<Bytes, UpstreamError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();

        if !status.is_success() {
            if self.strict_status {
                return Err(UpstreamError::Status(status));
            }
            tracing::warn!("Upstream returned HTTP {}, passing body through", status);
        }

        Ok(response.bytes().await?)
    }
}

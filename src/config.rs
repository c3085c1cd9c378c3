use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub upstream_url: String,
    pub fallback_path: PathBuf,
    pub cache_url: String,
    pub cache_key: String,
    pub cache_ttl_secs: u64,
    pub cache_coalesce_misses: bool,
    pub upstream_connect_timeout_secs: u64,
    pub upstream_timeout_secs: u64,
    pub upstream_strict_status: bool,
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            upstream_url: "http://hillheadsc.dyndns.biz:14580/current_weather.php".to_string(),
            fallback_path: PathBuf::from("./data/current_weather.json"),
            cache_url: "memory".to_string(),
            cache_key: "current_weather".to_string(),
            cache_ttl_secs: 10,
            cache_coalesce_misses: false,
            upstream_connect_timeout_secs: 5,
            upstream_timeout_secs: 30,
            upstream_strict_status: false,
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from any variable source; unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let config = Config {
            upstream_url: lookup("UPSTREAM_URL").unwrap_or(defaults.upstream_url),
            fallback_path: lookup("FALLBACK_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.fallback_path),
            cache_url: lookup("CACHE_URL").unwrap_or(defaults.cache_url),
            cache_key: lookup("CACHE_KEY").unwrap_or(defaults.cache_key),
            cache_ttl_secs: parse_var(&lookup, "CACHE_TTL_SECS", defaults.cache_ttl_secs)?,
            cache_coalesce_misses: parse_var(
                &lookup,
                "CACHE_COALESCE_MISSES",
                defaults.cache_coalesce_misses,
            )?,
            upstream_connect_timeout_secs: parse_var(
                &lookup,
                "UPSTREAM_CONNECT_TIMEOUT_SECS",
                defaults.upstream_connect_timeout_secs,
            )?,
            upstream_timeout_secs: parse_var(
                &lookup,
                "UPSTREAM_TIMEOUT_SECS",
                defaults.upstream_timeout_secs,
            )?,
            upstream_strict_status: parse_var(
                &lookup,
                "UPSTREAM_STRICT_STATUS",
                defaults.upstream_strict_status,
            )?,
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.cache_ttl_secs == 0 {
            anyhow::bail!("CACHE_TTL_SECS must be greater than zero");
        }
        if self.upstream_connect_timeout_secs == 0 {
            anyhow::bail!("UPSTREAM_CONNECT_TIMEOUT_SECS must be greater than zero");
        }
        if self.upstream_timeout_secs == 0 {
            anyhow::bail!("UPSTREAM_TIMEOUT_SECS must be greater than zero");
        }
        if self.cache_key.is_empty() || self.cache_key.chars().any(|c| c.is_whitespace()) {
            anyhow::bail!("CACHE_KEY must be non-empty and contain no whitespace");
        }
        reqwest::Url::parse(&self.upstream_url)
            .map_err(|e| anyhow::anyhow!("UPSTREAM_URL is not a valid URL: {}", e))?;
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has invalid value {:?}: {}", name, raw, e)),
        None => Ok(default),
    }
}

use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::collection::CollectionSettings;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. When absent the service keeps everything
    /// in process memory.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Base URL of the device API; readings are pulled from `{url}/{device_id}`.
    pub sensor_source_url: String,
    /// Optional bearer token for the device API.
    pub sensor_source_api_key: Option<String>,
    pub server_host: String,
    pub server_port: u16,
    /// Background sweep interval in seconds.
    pub collection_interval_secs: u64,
    /// Per-device fetch timeout in seconds.
    pub fetch_timeout_secs: u64,
    /// Devices fetched concurrently within one sweep.
    pub collection_concurrency: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source; `from_env` passes the process
    /// environment. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required =
            |key: &str| get(key).with_context(|| format!("missing required env var: {key}"));
        let optional = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_owned());

        Ok(Self {
            database_url: get("DATABASE_URL"),
            database_max_connections: positive(
                "DATABASE_MAX_CONNECTIONS",
                &optional("DATABASE_MAX_CONNECTIONS", "10"),
            )?,
            sensor_source_url: required("SENSOR_SOURCE_URL")?,
            sensor_source_api_key: get("SENSOR_SOURCE_API_KEY"),
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            collection_interval_secs: positive(
                "COLLECTION_INTERVAL_SECS",
                &optional("COLLECTION_INTERVAL_SECS", "600"),
            )?,
            fetch_timeout_secs: positive(
                "FETCH_TIMEOUT_SECS",
                &optional("FETCH_TIMEOUT_SECS", "10"),
            )?,
            collection_concurrency: positive(
                "COLLECTION_CONCURRENCY",
                &optional("COLLECTION_CONCURRENCY", "4"),
            )?,
        })
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn collection_settings(&self) -> CollectionSettings {
        CollectionSettings {
            fetch_timeout: self.fetch_timeout(),
            concurrency: self.collection_concurrency,
        }
    }
}

/// Parse a strictly positive integer, naming `key` in the error.
fn positive<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let value: T = raw
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{key} must be a positive integer, got {raw:?}"))?;
    if value <= T::default() {
        bail!("{key} must be a positive integer, got {raw:?}");
    }
    Ok(value)
}

pub mod models;

#[cfg(test)]
pub mod fake;

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tracing::debug;

/// Why a device could not be read from the sensor source.
///
/// These never escape a collection sweep: each one becomes the failure
/// outcome of its device.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("sensor source answered HTTP {0}")]
    Status(u16),

    #[error("sensor source does not know this device")]
    UnknownDevice,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// The external device API, as seen by the collection sweep.
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Current raw JSON for one device. Validation is the caller's job.
    async fn fetch(&self, device_id: &str) -> Result<Value, FetchError>;
}

/// Pulls readings over HTTP from `GET <base_url>/{device_id}`.
#[derive(Debug, Clone)]
pub struct HttpSensorSource {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    base_url: Url,
    /// Sent as `Authorization: Bearer <key>` when set.
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpSensorSource {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid sensor source URL: {base_url:?}"))?;
        if base_url.cannot_be_a_base() {
            bail!("sensor source URL cannot carry a path: {base_url}");
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build sensor source HTTP client")?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url,
                api_key,
                timeout,
            }),
        })
    }

    /// `base_url` with `device_id` appended as one escaped path segment.
    fn device_url(&self, device_id: &str) -> Result<Url, FetchError> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| FetchError::Transport("sensor source URL cannot carry a path".into()))?
            .pop_if_empty()
            .push(device_id);
        Ok(url)
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.inner.timeout)
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl SensorSource for HttpSensorSource {
    async fn fetch(&self, device_id: &str) -> Result<Value, FetchError> {
        let url = self.device_url(device_id)?;
        debug!(device_id = %device_id, url = %url, "Fetching sensor data");

        let mut request = self.inner.http.get(url);
        if let Some(key) = &self.inner.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(FetchError::UnknownDevice),
            status if !status.is_success() => return Err(FetchError::Status(status.as_u16())),
            _ => {}
        }

        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
        serde_json::from_slice::<Value>(&bytes)
            .map_err(|e| FetchError::InvalidPayload(format!("body is not JSON: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

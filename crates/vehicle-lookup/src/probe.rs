//! Connectivity latency probe

use crate::{http_client, LookupError};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_PROBE_URL: &str = "https://myvehicle.att.com/";

/// Measures round-trip latency to some endpoint
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    /// Elapsed milliseconds for one request
    async fn measure(&self) -> Result<f64, LookupError>;
}

/// Times a plain GET, body included
#[derive(Debug, Clone)]
pub struct HttpLatencyProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpLatencyProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, LookupError> {
        Ok(Self {
            client: http_client(timeout)?,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LatencyProbe for HttpLatencyProbe {
    async fn measure(&self) -> Result<f64, LookupError> {
        let started = Instant::now();
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        response.bytes().await?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }
        debug!("GET {} took {:.1} ms", self.url, elapsed_ms);
        Ok(elapsed_ms)
    }
}

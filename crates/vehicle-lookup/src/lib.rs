//! External Vehicle Lookups
//!
//! HTTP collaborators consulted at startup (VIN registry, ISP geolocation)
//! and the connectivity latency probe sampled by the poller. Every failure
//! here is soft: callers log it and carry on with partial context.

mod isp;
mod probe;
mod vin;

pub use isp::{parse_ipinfo, IspInfo, IspLookup, IPINFO_URL};
pub use probe::{HttpLatencyProbe, LatencyProbe, DEFAULT_PROBE_URL};
pub use vin::{parse_vpic, VehicleDetails, VinDecoder, VPIC_BASE_URL};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Lookup errors
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for LookupError {
    fn from(e: serde_json::Error) -> Self {
        LookupError::Parse(e.to_string())
    }
}

/// HTTP lookup configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Run VIN and ISP lookups at startup
    pub enabled: bool,
    pub vpic_url: String,
    pub ipinfo_url: String,
    /// Target of the connectivity latency probe
    pub probe_url: String,
    /// Seconds between latency probes; 0 disables the probe
    pub probe_interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            vpic_url: VPIC_BASE_URL.to_string(),
            ipinfo_url: IPINFO_URL.to_string(),
            probe_url: DEFAULT_PROBE_URL.to_string(),
            probe_interval_secs: 15,
            timeout_secs: 10,
        }
    }
}

impl LookupConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_interval(&self) -> Option<Duration> {
        (self.probe_interval_secs > 0).then(|| Duration::from_secs(self.probe_interval_secs))
    }
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared HTTP client construction
fn http_client(timeout: Duration) -> Result<reqwest::Client, LookupError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .build()?;
    Ok(client)
}

/// Fetch `url` and parse a JSON body; non-2xx is [`LookupError::Status`]
async fn get_json(client: &reqwest::Client, url: &str) -> Result<serde_json::Value, LookupError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(LookupError::Status(status.as_u16()));
    }
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LookupConfig::default();
        assert!(config.enabled);
        assert_eq!(config.probe_interval(), Some(Duration::from_secs(15)));
        assert_eq!(config.timeout(), Duration::from_secs(10));

        let disabled = LookupConfig {
            probe_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(disabled.probe_interval(), None);
    }

    #[test]
    fn test_json_error_maps_to_parse() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(LookupError::from(err), LookupError::Parse(_)));
    }
}

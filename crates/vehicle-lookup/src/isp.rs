//! ISP and coarse location lookup

use crate::{get_json, http_client, LookupError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::info;

pub const IPINFO_URL: &str = "https://ipinfo.io/json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IspInfo {
    pub isp_name: String,
    /// "lat,long"
    pub location: String,
}

/// ipinfo.io client
#[derive(Debug, Clone)]
pub struct IspLookup {
    client: reqwest::Client,
    url: String,
}

impl IspLookup {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, LookupError> {
        Ok(Self {
            client: http_client(timeout)?,
            url: url.into(),
        })
    }

    pub async fn lookup(&self) -> Result<IspInfo, LookupError> {
        let body = get_json(&self.client, &self.url).await?;
        let info = parse_ipinfo(&body)?;
        info!("ISP: {} at {}", info.isp_name, info.location);
        Ok(info)
    }
}

/// Parse an ipinfo body; `org` values like "AS7018 AT&T Services, Inc."
/// lose their AS number.
pub fn parse_ipinfo(body: &Value) -> Result<IspInfo, LookupError> {
    let org = body
        .get("org")
        .and_then(Value::as_str)
        .ok_or_else(|| LookupError::Parse("missing org".to_string()))?;
    let location = body
        .get("loc")
        .and_then(Value::as_str)
        .ok_or_else(|| LookupError::Parse("missing loc".to_string()))?;

    let (lat, long) = location
        .split_once(',')
        .ok_or_else(|| LookupError::Parse(format!("bad loc {location:?}")))?;
    for part in [lat, long] {
        part.trim()
            .parse::<f64>()
            .map_err(|_| LookupError::Parse(format!("bad coordinate {part:?}")))?;
    }

    let isp_name = match org.split_once(' ') {
        Some((asn, rest)) if asn.starts_with("AS") => rest.trim().to_string(),
        _ => org.to_string(),
    };

    Ok(IspInfo {
        isp_name,
        location: location.to_string(),
    })
}

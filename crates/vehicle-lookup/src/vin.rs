//! VIN decoding against the NHTSA vPIC registry

use crate::{get_json, http_client, LookupError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

pub const VPIC_BASE_URL: &str = "https://vpic.nhtsa.dot.gov/api/vehicles/DecodeVin/";

/// Registry details for one VIN; fields the registry leaves blank are `None`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleDetails {
    pub model_year: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub series: Option<String>,
    pub manufacturer_name: Option<String>,
    pub trim: Option<String>,
    pub vehicle_type: Option<String>,
}

/// vPIC client
#[derive(Debug, Clone)]
pub struct VinDecoder {
    client: reqwest::Client,
    base_url: String,
}

impl VinDecoder {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LookupError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into(),
        })
    }

    pub fn url_for(&self, vin: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/{vin}?format=json")
    }

    pub async fn decode(&self, vin: &str) -> Result<VehicleDetails, LookupError> {
        let url = self.url_for(vin);
        debug!("Decoding VIN via {}", url);
        let body = get_json(&self.client, &url).await?;
        let details = parse_vpic(&body)?;
        info!(
            "VIN {} decoded: {} {} {}",
            vin,
            details.model_year.as_deref().unwrap_or("?"),
            details.make.as_deref().unwrap_or("?"),
            details.model.as_deref().unwrap_or("?")
        );
        Ok(details)
    }
}

/// Extract [`VehicleDetails`] from a vPIC `DecodeVin` body
pub fn parse_vpic(body: &Value) -> Result<VehicleDetails, LookupError> {
    let results = body
        .get("Results")
        .and_then(Value::as_array)
        .ok_or_else(|| LookupError::Parse("missing Results array".to_string()))?;

    let mut details = VehicleDetails::default();
    for item in results {
        let Some(variable) = item.get("Variable").and_then(Value::as_str) else {
            continue;
        };
        let value = item
            .get("Value")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let field = match variable {
            "Model Year" => &mut details.model_year,
            "Make" => &mut details.make,
            "Model" => &mut details.model,
            "Series" => &mut details.series,
            "Manufacturer Name" => &mut details.manufacturer_name,
            "Trim" => &mut details.trim,
            "Vehicle Type" => &mut details.vehicle_type,
            _ => continue,
        };
        *field = value;
    }
    Ok(details)
}

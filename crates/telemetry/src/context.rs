//! Vehicle Context Attributes

use obd_protocol::PhysicalValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Span attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Str(s) => f.write_str(s),
            AttributeValue::Int(i) => write!(f, "{i}"),
            AttributeValue::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Str(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Str(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<usize> for AttributeValue {
    fn from(value: usize) -> Self {
        AttributeValue::Int(value as i64)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<&PhysicalValue> for AttributeValue {
    fn from(value: &PhysicalValue) -> Self {
        match value {
            PhysicalValue::Number(v) => AttributeValue::Float(*v),
            PhysicalValue::Text(s) => AttributeValue::Str(s.clone()),
            PhysicalValue::Codes(codes) => AttributeValue::Str(codes.join(",")),
        }
    }
}

/// Vehicle identity resolved once at startup.
///
/// Shared read-only with every span and gauge observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleContext {
    pub vin: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub model_year: Option<String>,
    pub series: Option<String>,
    pub dtc_count: usize,
    pub isp_name: Option<String>,
    /// "lat,long"
    pub location: Option<String>,
}

impl VehicleContext {
    /// Namespaced attributes for spans and observations; unknown fields
    /// are omitted.
    pub fn attributes(&self, prefix: &str) -> Vec<(String, AttributeValue)> {
        let optional = [
            ("vin", &self.vin),
            ("make", &self.make),
            ("model", &self.model),
            ("year", &self.model_year),
            ("series", &self.series),
            ("isp", &self.isp_name),
        ];

        let mut attributes: Vec<(String, AttributeValue)> = optional
            .into_iter()
            .filter_map(|(key, value)| {
                let value = value.as_deref()?;
                Some((format!("{prefix}.{key}"), AttributeValue::from(value)))
            })
            .collect();
        attributes.push((
            format!("{prefix}.{}", crate::metric::DTC_COUNT),
            AttributeValue::from(self.dtc_count),
        ));
        attributes
    }

    /// Attributes rendered as string labels
    pub fn labels(&self, prefix: &str) -> Vec<(String, String)> {
        self.attributes(prefix)
            .into_iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect()
    }

    /// Human-readable "year make model"
    pub fn describe(&self) -> String {
        [&self.model_year, &self.make, &self.model]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

//! Log and trace subscriber setup

use crate::TelemetryError;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::TracerProvider;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
    /// Emit one JSON object per line
    pub json: bool,
    /// Service name on exported spans
    pub service_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            service_name: "obd-agent".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn max_level(&self) -> Result<Level, TelemetryError> {
        Level::from_str(self.level.trim())
            .map_err(|_| TelemetryError::InvalidLogLevel(self.level.clone()))
    }
}

/// Initialize the global subscriber: fmt output plus the OpenTelemetry
/// layer that turns operation spans and their attributes into traces.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let level = config.max_level()?;

    let provider = TracerProvider::builder().build();
    let tracer = provider.tracer(config.service_name.clone());
    opentelemetry::global::set_tracer_provider(provider);

    let (json, text) = if config.json {
        (Some(tracing_subscriber::fmt::layer().json().with_target(true)), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer().with_target(true)))
    };

    tracing_subscriber::registry()
        .with(LevelFilter::from_level(level))
        .with(json)
        .with(text)
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))
}

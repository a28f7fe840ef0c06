//! Telemetry Exposition
//!
//! Bridges the reading store to pull-based gauges, wraps one-shot
//! operations in spans, and installs the log and trace subscriber.

mod bridge;
mod context;
mod logging;
mod span;

pub use bridge::{
    install_prometheus_exporter, GaugeSink, GaugeSpec, GaugeUnit, MetricBridge, Observation,
    RecorderSink,
};
pub use context::{AttributeValue, VehicleContext};
pub use logging::{init_logging, LoggingConfig};
pub use span::{
    FinishedSpan, MemoryTraceSink, OperationSpan, SpanStatus, TraceSink, Tracer, TRACE_TARGET,
};

use thiserror::Error;

/// Default attribute and metric name prefix
pub const DEFAULT_PREFIX: &str = "vehicle";

/// Metric name suffixes; full names are `<prefix>.<suffix>`
pub mod metric {
    pub const FUEL_LEVEL: &str = "fuel.level";
    pub const MILEAGE: &str = "mileage";
    pub const RESPONSE_TIME: &str = "wifi.http.response";
    pub const DTC_COUNT: &str = "dtc.count";

    /// Namespaced name, e.g. `vehicle.fuel.level`
    pub fn name(prefix: &str, suffix: &str) -> String {
        format!("{prefix}.{suffix}")
    }
}

/// Telemetry setup errors
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("Failed to install log subscriber: {0}")]
    Subscriber(String),

    #[error("Failed to install metrics exporter: {0}")]
    Exporter(String),
}

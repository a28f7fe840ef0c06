//! Metric Exposition Bridge
//!
//! Reports the latest stored reading of each metric as a gauge observation
//! on every collection cycle, however stale the reading is.

use crate::context::VehicleContext;
use crate::{metric, TelemetryError};
use metrics::Label;
use metrics_exporter_prometheus::PrometheusBuilder;
use reading_store::ReadingReader;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Gauge units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GaugeUnit {
    Percent,
    Miles,
    Milliseconds,
}

/// One registered gauge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeSpec {
    /// Full metric name, also the reading store slot
    pub metric: String,
    pub description: String,
    pub unit: GaugeUnit,
}

impl GaugeSpec {
    pub fn new(metric: impl Into<String>, description: impl Into<String>, unit: GaugeUnit) -> Self {
        Self {
            metric: metric.into(),
            description: description.into(),
            unit,
        }
    }

    /// Fuel level, mileage and connectivity response time
    pub fn defaults(prefix: &str) -> Vec<GaugeSpec> {
        vec![
            GaugeSpec::new(
                metric::name(prefix, metric::RESPONSE_TIME),
                "in-vehicle wifi http response time",
                GaugeUnit::Milliseconds,
            ),
            GaugeSpec::new(
                metric::name(prefix, metric::FUEL_LEVEL),
                "vehicle fuel level",
                GaugeUnit::Percent,
            ),
            GaugeSpec::new(
                metric::name(prefix, metric::MILEAGE),
                "vehicle mileage",
                GaugeUnit::Miles,
            ),
        ]
    }
}

/// Instantaneous gauge value with its labels
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub value: f64,
    pub labels: Vec<(String, String)>,
}

/// Receives gauge observations on each collection cycle
pub trait GaugeSink: Send + Sync {
    fn describe(&self, _spec: &GaugeSpec) {}

    fn record(&self, metric: &str, observation: &Observation);
}

/// Publishes gauges through the `metrics` facade
#[derive(Debug, Default)]
pub struct RecorderSink;

impl GaugeSink for RecorderSink {
    fn describe(&self, spec: &GaugeSpec) {
        let name = spec.metric.clone();
        let description = spec.description.clone();
        match spec.unit {
            GaugeUnit::Percent => metrics::describe_gauge!(name, metrics::Unit::Percent, description),
            GaugeUnit::Milliseconds => {
                metrics::describe_gauge!(name, metrics::Unit::Milliseconds, description)
            }
            // no mile unit in the metrics facade
            GaugeUnit::Miles => metrics::describe_gauge!(name, description),
        }
    }

    fn record(&self, metric: &str, observation: &Observation) {
        let labels: Vec<Label> = observation
            .labels
            .iter()
            .map(|(k, v)| Label::new(k.clone(), v.clone()))
            .collect();
        metrics::gauge!(metric.to_string(), labels).set(observation.value);
    }
}

/// Serve gauges on a Prometheus scrape endpoint
pub fn install_prometheus_exporter(addr: SocketAddr) -> Result<(), TelemetryError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| TelemetryError::Exporter(e.to_string()))?;
    info!("Prometheus exporter listening on {}", addr);
    Ok(())
}

/// Reads the store and reports one observation per written metric
pub struct MetricBridge {
    reader: ReadingReader,
    gauges: Vec<GaugeSpec>,
    labels: Vec<(String, String)>,
    sink: Arc<dyn GaugeSink>,
}

impl MetricBridge {
    pub fn new(
        reader: ReadingReader,
        gauges: Vec<GaugeSpec>,
        context: &VehicleContext,
        prefix: &str,
        sink: Arc<dyn GaugeSink>,
    ) -> Self {
        Self {
            reader,
            gauges,
            labels: context.labels(prefix),
            sink,
        }
    }

    /// Describe every gauge to the sink
    pub fn register(&self) {
        for gauge in &self.gauges {
            self.sink.describe(gauge);
            debug!("Registered gauge {}", gauge.metric);
        }
    }

    pub fn gauges(&self) -> &[GaugeSpec] {
        &self.gauges
    }

    /// Pull callback for one gauge: empty when the metric has no data yet
    pub fn collect(&self, metric: &str) -> Vec<Observation> {
        let reading = match self.reader.read(metric) {
            Ok(Some(reading)) => reading,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Gauge {} has no store slot: {}", metric, e);
                return Vec::new();
            }
        };

        match reading.value.as_f64() {
            Some(value) => vec![Observation {
                value,
                labels: self.labels.clone(),
            }],
            None => {
                debug!("Reading for {} is not numeric, skipping", metric);
                Vec::new()
            }
        }
    }

    /// One collection cycle; returns the number of observations recorded
    pub fn export_once(&self) -> usize {
        let mut recorded = 0;
        for gauge in &self.gauges {
            for observation in self.collect(&gauge.metric) {
                self.sink.record(&gauge.metric, &observation);
                recorded += 1;
            }
        }
        recorded
    }

    /// Run collection cycles every `interval` until shutdown
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        self.register();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Metric bridge exporting {} gauges every {:?}", self.gauges.len(), interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let recorded = self.export_once();
                    debug!("Exported {} gauge observations", recorded);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Metric bridge stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::PhysicalValue;
    use reading_store::ReadingStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        described: Mutex<Vec<String>>,
        recorded: Mutex<Vec<(String, f64)>>,
    }

    impl GaugeSink for CollectingSink {
        fn describe(&self, spec: &GaugeSpec) {
            self.described.lock().unwrap().push(spec.metric.clone());
        }

        fn record(&self, metric: &str, observation: &Observation) {
            self.recorded
                .lock()
                .unwrap()
                .push((metric.to_string(), observation.value));
        }
    }

    fn bridge() -> (reading_store::ReadingWriter, Arc<CollectingSink>, MetricBridge) {
        let gauges = GaugeSpec::defaults("vehicle");
        let (writer, reader) = ReadingStore::new(gauges.iter().map(|g| g.metric.clone()));
        let context = VehicleContext {
            vin: Some("1FTFW1ET5DFC10312".into()),
            ..Default::default()
        };
        let sink = Arc::new(CollectingSink::default());
        let bridge = MetricBridge::new(reader, gauges, &context, "vehicle", sink.clone());
        (writer, sink, bridge)
    }

    #[test]
    fn test_no_data_yields_no_observation() {
        let (_writer, sink, bridge) = bridge();
        assert!(bridge.collect("vehicle.fuel.level").is_empty());
        assert_eq!(bridge.export_once(), 0);
        assert!(sink.recorded.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reports_latest_value_with_context_labels() {
        let (writer, _sink, bridge) = bridge();
        writer
            .write("vehicle.fuel.level", PhysicalValue::Number(0.0))
            .unwrap();

        let observations = bridge.collect("vehicle.fuel.level");
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].value, 0.0);
        assert!(observations[0]
            .labels
            .contains(&("vehicle.vin".to_string(), "1FTFW1ET5DFC10312".to_string())));
    }

    #[test]
    fn test_stale_value_is_reported_every_cycle() {
        let (writer, sink, bridge) = bridge();
        writer
            .write("vehicle.mileage", PhysicalValue::Number(4072.22))
            .unwrap();

        assert_eq!(bridge.export_once(), 1);
        assert_eq!(bridge.export_once(), 1);
        let recorded = sink.recorded.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![
                ("vehicle.mileage".to_string(), 4072.22),
                ("vehicle.mileage".to_string(), 4072.22)
            ]
        );
    }

    #[test]
    fn test_text_and_unknown_metrics_are_skipped() {
        let (writer, _sink, bridge) = bridge();
        writer
            .write("vehicle.mileage", PhysicalValue::Text("n/a".into()))
            .unwrap();
        assert!(bridge.collect("vehicle.mileage").is_empty());
        assert!(bridge.collect("vehicle.rpm").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exports_until_shutdown() {
        let (writer, sink, bridge) = bridge();
        writer
            .write("vehicle.fuel.level", PhysicalValue::Number(55.0))
            .unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(bridge.run(Duration::from_secs(15), shutdown_rx));
        tokio::time::sleep(Duration::from_secs(31)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(sink.described.lock().unwrap().len(), 3);
        // ticks at 0s, 15s, 30s
        assert_eq!(sink.recorded.lock().unwrap().len(), 3);
    }
}

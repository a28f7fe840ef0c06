//! Watch Loop Implementation

use crate::{PollerError, SupportReport};
use obd_protocol::{commands, CommandRegistry, Connection, ObdError, PhysicalValue, Response};
use reading_store::ReadingWriter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use telemetry::{metric, Tracer};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use vehicle_lookup::{LatencyProbe, LookupError};

/// Routes one command's responses into one metric slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchBinding {
    /// Registered command name, e.g. "FUEL_LEVEL"
    pub command: String,
    /// Metric suffix, e.g. "fuel.level"; the slot is `<prefix>.<metric>`
    pub metric: String,
}

impl WatchBinding {
    pub fn new(command: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            metric: metric.into(),
        }
    }

    /// Fuel level and mileage
    pub fn defaults() -> Vec<WatchBinding> {
        vec![
            WatchBinding::new(commands::FUEL_LEVEL, metric::FUEL_LEVEL),
            WatchBinding::new(commands::MILEAGE, metric::MILEAGE),
        ]
    }
}

/// Configuration for the poller
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Capacity of the response event channel
    pub event_buffer: usize,
    /// Time between connectivity probes
    pub probe_interval: Option<Duration>,
    /// Metric suffix written with probe results
    pub probe_metric: String,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            event_buffer: 64,
            probe_interval: Some(Duration::from_secs(15)),
            probe_metric: metric::RESPONSE_TIME.to_string(),
        }
    }
}

/// What [`Poller::handle_response`] did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Decoded and stored
    Updated,
    /// Frame too short or undecodable; slot untouched
    Skipped,
    /// No binding for the command
    Unbound,
}

struct Binding {
    command: String,
    suffix: String,
    /// Full slot name
    slot: String,
}

/// Owns the connection and is the only writer of the reading store
pub struct Poller {
    connection: Box<dyn Connection>,
    registry: Arc<CommandRegistry>,
    writer: ReadingWriter,
    tracer: Tracer,
    bindings: Vec<Binding>,
    probe: Option<Arc<dyn LatencyProbe>>,
    config: PollerConfig,
    stopped: bool,
}

impl Poller {
    /// Every binding must name a registered command and an existing slot
    pub fn new(
        connection: Box<dyn Connection>,
        registry: Arc<CommandRegistry>,
        writer: ReadingWriter,
        tracer: Tracer,
        bindings: Vec<WatchBinding>,
        config: PollerConfig,
    ) -> Result<Self, PollerError> {
        Self::check_bindings(&registry, &writer, &tracer, &bindings)?;
        let resolved: Vec<Binding> = bindings
            .into_iter()
            .map(|binding| Binding {
                slot: tracer.attribute_key(&binding.metric),
                command: binding.command,
                suffix: binding.metric,
            })
            .collect();

        info!("Poller created with {} bindings", resolved.len());
        Ok(Self {
            connection,
            registry,
            writer,
            tracer,
            bindings: resolved,
            probe: None,
            config,
            stopped: false,
        })
    }

    /// Check bindings against the registry and the store's slots
    pub fn check_bindings(
        registry: &CommandRegistry,
        writer: &ReadingWriter,
        tracer: &Tracer,
        bindings: &[WatchBinding],
    ) -> Result<(), PollerError> {
        for binding in bindings {
            registry.get(&binding.command)?;
            let slot = tracer.attribute_key(&binding.metric);
            if !writer.contains(&slot) {
                return Err(reading_store::StoreError::UnknownMetric(slot).into());
            }
        }
        Ok(())
    }

    /// Sample connectivity latency alongside the watches
    pub fn with_probe(mut self, probe: Arc<dyn LatencyProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Install a watch for each bound command the vehicle supports
    pub fn watch_supported(
        &mut self,
        supported: &HashSet<String>,
    ) -> Result<SupportReport, PollerError> {
        let mut report = SupportReport::default();
        for binding in &self.bindings {
            let command = self.registry.get(&binding.command)?;
            if CommandRegistry::is_supported(command, supported) {
                self.connection.watch(command.clone())?;
                info!("Watching {} pid", command.name());
                report.supported.push(binding.command.clone());
            } else {
                warn!("{} is unsupported by this vehicle, not watching", command.name());
                report.unsupported.push(binding.command.clone());
            }
        }
        Ok(report)
    }

    fn binding(&self, command: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.command == command)
    }

    /// Decode one response and replace the bound metric's reading
    pub fn handle_response(&self, response: &Response) -> UpdateOutcome {
        let Some(binding) = self.binding(&response.command) else {
            debug!("No binding for {}, ignoring", response.command);
            return UpdateOutcome::Unbound;
        };
        let command = match self.registry.get(&binding.command) {
            Ok(command) => command,
            Err(e) => {
                error!("{}", e);
                return UpdateOutcome::Unbound;
            }
        };

        let Some(value) = command.decode(&response.data) else {
            debug!(
                "Skipping {} frame of {} bytes",
                command.name(),
                response.data.len()
            );
            return UpdateOutcome::Skipped;
        };

        let mut span = self.tracer.start_debug(format!("{}.callback", binding.suffix));
        span.set_metric(&binding.suffix, &value);
        debug!("{}: {}", command.description(), value);

        match self.writer.write(&binding.slot, value) {
            Ok(()) => UpdateOutcome::Updated,
            Err(e) => {
                span.set_error(e.to_string());
                error!("Failed to store {}: {}", binding.slot, e);
                UpdateOutcome::Skipped
            }
        }
    }

    /// Store one probe result; failures leave the slot untouched
    pub fn record_latency(&self, result: Result<f64, LookupError>) -> UpdateOutcome {
        let slot = self.tracer.attribute_key(&self.config.probe_metric);
        match result {
            Ok(elapsed_ms) => match self.writer.write(&slot, PhysicalValue::Number(elapsed_ms)) {
                Ok(()) => UpdateOutcome::Updated,
                Err(e) => {
                    warn!("Failed to store latency: {}", e);
                    UpdateOutcome::Skipped
                }
            },
            Err(e) => {
                warn!("Connectivity probe failed: {}", e);
                UpdateOutcome::Skipped
            }
        }
    }

    /// Start the watches and process events until `shutdown` is set
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), PollerError> {
        if self.stopped {
            return Err(ObdError::ConnectionClosed.into());
        }

        let (events_tx, mut events) = mpsc::channel(self.config.event_buffer.max(1));
        if let Err(e) = self.connection.start(events_tx) {
            self.stop().await;
            return Err(e.into());
        }
        info!("Starting async connection...");

        let probe_enabled = self.probe.is_some() && self.config.probe_interval.is_some();
        let period = self.config.probe_interval.unwrap_or(Duration::from_secs(60));
        let mut probe_timer = tokio::time::interval(period);
        probe_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let (probe_tx, mut probe_rx) = mpsc::channel::<Result<f64, LookupError>>(1);
        let mut probe_in_flight = false;
        let mut events_open = true;

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                event = events.recv(), if events_open => match event {
                    Some(response) => {
                        self.handle_response(&response);
                    }
                    None => {
                        warn!("Adapter stopped delivering responses");
                        events_open = false;
                    }
                },
                _ = probe_timer.tick(), if probe_enabled && !probe_in_flight => {
                    if let Some(probe) = self.probe.clone() {
                        probe_in_flight = true;
                        let tx = probe_tx.clone();
                        tokio::spawn(async move {
                            let _ = tx.send(probe.measure().await).await;
                        });
                    }
                }
                Some(result) = probe_rx.recv() => {
                    probe_in_flight = false;
                    self.record_latency(result);
                }
            }
        }

        info!("Stopping async connection...");
        self.stop().await;
        Ok(())
    }

    /// Stop all watches and release the connection; later calls are no-ops
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.connection.stop().await;
        info!("Poller stopped");
    }

    /// Whether the connection has been released
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

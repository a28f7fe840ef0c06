//! OBD Telemetry Agent
//!
//! Startup orchestration: connect, resolve the vehicle context, then run
//! the watch loop and the metric bridge until shutdown.

mod settings;

pub use settings::{
    AdapterConfig, AdapterKind, AgentConfig, CommandConfig, TelemetryConfig, CONFIG_PATH_ENV,
    DEFAULT_CONFIG_PATH,
};

use anyhow::Context;
use obd_poller::{PollerConfig, Session, ShutdownHandle};
use obd_protocol::{Elm327Transport, MockTransport, Transport};
use reading_store::ReadingStore;
use std::sync::Arc;
use telemetry::{
    install_prometheus_exporter, MetricBridge, RecorderSink, TraceSink, Tracer, VehicleContext,
};
use tracing::{info, warn};
use vehicle_lookup::{HttpLatencyProbe, IspLookup, LatencyProbe, LookupConfig, VinDecoder};

/// Transport selected by the adapter section
pub fn transport(config: &AdapterConfig) -> Box<dyn Transport> {
    match config.kind {
        AdapterKind::Elm327 => Box::new(Elm327Transport::new(config.elm327.clone())),
        AdapterKind::Mock => Box::new(MockTransport::demo()),
    }
}

/// Resolve registry and ISP details; every failure here is soft
pub async fn resolve_context(vin: Option<String>, lookup: &LookupConfig) -> VehicleContext {
    let mut context = VehicleContext {
        vin,
        ..Default::default()
    };
    if !lookup.enabled {
        return context;
    }

    if let Some(vin) = context.vin.clone() {
        let decoded = match VinDecoder::new(&lookup.vpic_url, lookup.timeout()) {
            Ok(decoder) => decoder.decode(&vin).await,
            Err(e) => Err(e),
        };
        match decoded {
            Ok(details) => {
                context.make = details.make;
                context.model = details.model;
                context.model_year = details.model_year;
                context.series = details.series;
            }
            Err(e) => warn!("VIN API Error: {}", e),
        }
    }

    let isp = match IspLookup::new(&lookup.ipinfo_url, lookup.timeout()) {
        Ok(isp) => isp.lookup().await,
        Err(e) => Err(e),
    };
    match isp {
        Ok(info) => {
            context.isp_name = Some(info.isp_name);
            context.location = Some(info.location);
        }
        Err(e) => warn!("ISP lookup failed: {}", e),
    }
    context
}

fn latency_probe(lookup: &LookupConfig) -> Option<Arc<dyn LatencyProbe>> {
    match HttpLatencyProbe::new(&lookup.probe_url, lookup.timeout()) {
        Ok(probe) => Some(Arc::new(probe)),
        Err(e) => {
            warn!("Connectivity probe disabled: {}", e);
            None
        }
    }
}

fn install_exporter(telemetry: &TelemetryConfig) -> anyhow::Result<()> {
    if let Some(addr) = telemetry.prometheus_addr()? {
        install_prometheus_exporter(addr)?;
    }
    Ok(())
}

/// Run the agent until `shutdown` fires
pub async fn run(config: AgentConfig, shutdown: ShutdownHandle) -> anyhow::Result<()> {
    let transport = transport(&config.adapter);
    run_with(config, transport, None, shutdown).await
}

/// [`run`] with an explicit transport and an optional extra trace sink
pub async fn run_with(
    config: AgentConfig,
    transport: Box<dyn Transport>,
    trace_sink: Option<Arc<dyn TraceSink>>,
    shutdown: ShutdownHandle,
) -> anyhow::Result<()> {
    let prefix = config.telemetry.prefix.clone();
    let registry = Arc::new(config.registry()?);
    let tracer = match trace_sink {
        Some(sink) => Tracer::new(prefix.clone()).with_sink(sink),
        None => Tracer::new(prefix.clone()),
    };

    let mut session = Session::connect(
        transport.as_ref(),
        &config.adapter.device,
        registry,
        tracer,
    )
    .await
    .context("Unable to connect to vehicle")?;

    if let Err(e) = session.check_support(config.required.iter().map(String::as_str)) {
        session.close().await;
        return Err(e.into());
    }

    // the VIN and fault codes are always read at startup
    let vin = session.read_vin().await;
    let mut context = resolve_context(vin, &config.lookup).await;
    session.set_context(Arc::new(context.clone()));
    context.dtc_count = session.get_dtc_count().await;

    info!("Gathering supported telemetry for {}", context.describe());
    if let Some(location) = &context.location {
        info!("Current vehicle position: {}", location);
    }
    let context = Arc::new(context);
    session.set_context(context.clone());

    let (writer, reader) = ReadingStore::new(config.store_metrics());

    if let Err(e) = install_exporter(&config.telemetry) {
        session.close().await;
        return Err(e);
    }

    let poller_config = PollerConfig {
        probe_interval: config.lookup.probe_interval(),
        ..Default::default()
    };
    let (poller, report) = session
        .into_poller(writer, config.watches.clone(), poller_config)
        .await?;
    if report.supported.is_empty() {
        warn!("No watched command is supported by this vehicle");
    }
    let probe = config
        .lookup
        .enabled
        .then(|| latency_probe(&config.lookup))
        .flatten();
    let mut poller = match probe {
        Some(probe) => poller.with_probe(probe),
        None => poller,
    };

    let bridge = MetricBridge::new(
        reader,
        config.gauges(),
        &context,
        &prefix,
        Arc::new(RecorderSink),
    );
    let bridge_task = tokio::spawn(bridge.run(config.telemetry.export_interval(), shutdown.subscribe()));

    let result = poller.run(shutdown.subscribe()).await;
    shutdown.trigger();
    bridge_task.await.context("metric bridge task failed")?;
    result?;

    info!("Agent stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use telemetry::MemoryTraceSink;

    fn offline_config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.adapter.kind = AdapterKind::Mock;
        config.lookup.enabled = false;
        config
    }

    #[tokio::test]
    async fn test_refused_connection_is_fatal() {
        let sink = Arc::new(MemoryTraceSink::new());
        let result = run_with(
            offline_config(),
            Box::new(MockTransport::new().refuse_connection()),
            Some(sink.clone()),
            ShutdownHandle::new(),
        )
        .await;

        assert!(result.is_err());
        assert!(sink.find("obd2.init").unwrap().is_error());
        assert!(sink.find("get-dtc").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_demo_run_until_shutdown() {
        let transport = MockTransport::demo();
        let stats = transport.stats();
        let sink = Arc::new(MemoryTraceSink::new());
        let shutdown = ShutdownHandle::new();

        let agent = tokio::spawn(run_with(
            offline_config(),
            Box::new(transport),
            Some(sink.clone()),
            shutdown.clone(),
        ));
        tokio::time::sleep(Duration::from_secs(3)).await;
        shutdown.trigger();
        agent.await.unwrap().unwrap();

        assert_eq!(stats.releases(), 1);
        let dtc = sink.find("get-dtc").unwrap();
        assert_eq!(
            dtc.attribute("vehicle.dtc.count"),
            Some(&telemetry::AttributeValue::Int(1))
        );
        assert_eq!(
            dtc.attribute("vehicle.vin"),
            Some(&telemetry::AttributeValue::Str("1FTFW1ET5DFC10312".into()))
        );
        assert!(sink.find("mileage.callback").is_some());
    }

    #[tokio::test]
    async fn test_unknown_required_command_releases_adapter() {
        let transport = MockTransport::demo();
        let stats = transport.stats();
        let mut config = offline_config();
        config.required.push("RPM".to_string());

        let result = run_with(config, Box::new(transport), None, ShutdownHandle::new()).await;
        assert!(result.is_err());
        assert_eq!(stats.connects(), 1);
        assert_eq!(stats.releases(), 1);
    }

    #[tokio::test]
    async fn test_bad_exporter_address_releases_adapter() {
        let transport = MockTransport::demo();
        let stats = transport.stats();
        let mut config = offline_config();
        config.telemetry.prometheus_listen = Some("not-an-address".to_string());

        let result = run_with(config, Box::new(transport), None, ShutdownHandle::new()).await;
        assert!(result.is_err());
        assert_eq!(stats.releases(), 1);
    }

    #[tokio::test]
    async fn test_context_without_lookups() {
        let lookup = LookupConfig {
            enabled: false,
            ..Default::default()
        };
        let context = resolve_context(Some("1FTFW1ET5DFC10312".into()), &lookup).await;
        assert_eq!(context.vin.as_deref(), Some("1FTFW1ET5DFC10312"));
        assert_eq!(context.make, None);
        assert_eq!(context.isp_name, None);
    }
}

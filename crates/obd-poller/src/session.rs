//! One-shot startup queries
//!
//! A [`Session`] wraps a freshly opened connection for the queries made
//! before the watch loop begins: support check, VIN and fault codes. Each
//! runs inside its own span.

use crate::poller::{Poller, PollerConfig, WatchBinding};
use crate::{PollerError, SupportReport};
use obd_protocol::{commands, CommandRegistry, Connection, PhysicalValue, Transport};
use reading_store::ReadingWriter;
use std::collections::HashSet;
use std::sync::Arc;
use telemetry::{metric, Tracer, VehicleContext};
use tracing::{error, info, warn, Instrument};

/// A connected adapter before the watch loop takes it over
pub struct Session {
    connection: Box<dyn Connection>,
    registry: Arc<CommandRegistry>,
    tracer: Tracer,
    supported: HashSet<String>,
}

impl Session {
    /// Connect inside the `obd2.init` span. Failure is fatal for startup.
    pub async fn connect(
        transport: &dyn Transport,
        device: &str,
        registry: Arc<CommandRegistry>,
        tracer: Tracer,
    ) -> Result<Self, PollerError> {
        let mut span = tracer.start("obd2.init");
        span.set_attribute("obd2.device", device);
        info!("Initializing OBD connection...");

        let instrument = span.span().clone();
        let opened = async {
            let mut connection = transport.connect(device).await?;
            let supported = connection.supported_commands(&registry).await?;
            Ok::<_, PollerError>((connection, supported))
        }
        .instrument(instrument)
        .await;

        match opened {
            Ok((connection, supported)) => {
                info!("Successfully connected to OBD-II adapter!");
                span.set_attribute("obd2.supported", supported.len());
                Ok(Self {
                    connection,
                    registry,
                    tracer,
                    supported,
                })
            }
            Err(e) => {
                error!("Unable to connect to vehicle: {}", e);
                span.set_error(format!("Unable to connect to vehicle: {e}"));
                Err(e)
            }
        }
    }

    /// Command names the vehicle reported as supported
    pub fn supported(&self) -> &HashSet<String> {
        &self.supported
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Stamp later spans with the resolved vehicle context
    pub fn set_context(&mut self, context: Arc<VehicleContext>) {
        self.tracer = self.tracer.with_context(context);
    }

    /// Report which of `names` the vehicle supports
    pub fn check_support<'a, I>(&self, names: I) -> Result<SupportReport, PollerError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        info!("Checking supported commands...");
        let mut report = SupportReport::default();
        for name in names {
            let command = self.registry.get(name)?;
            if CommandRegistry::is_supported(command, &self.supported) {
                info!("{}: Supported", command.name());
                report.supported.push(name.to_string());
            } else {
                warn!("{}: UNSUPPORTED", command.name());
                report.unsupported.push(name.to_string());
            }
        }
        Ok(report)
    }

    /// Query one command inside a `get-reading-<name>` span.
    ///
    /// `Ok(None)` when the vehicle gave no usable answer; unknown command
    /// names and transport failures are errors.
    pub async fn get_reading(&mut self, name: &str) -> Result<Option<PhysicalValue>, PollerError> {
        let mut span = self.tracer.start(format!("get-reading-{name}"));
        let command = match self.registry.get(name) {
            Ok(command) => command,
            Err(e) => {
                warn!("Command '{}' is not recognized.", name);
                span.set_error(e.to_string());
                return Err(e.into());
            }
        };

        let response = match self
            .connection
            .query(command)
            .instrument(span.span().clone())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to get reading for {}: {}", name, e);
                span.set_error(e.to_string());
                return Err(e.into());
            }
        };

        match response.and_then(|r| command.decode(&r.data)) {
            Some(value) => {
                span.set_metric(&command.attribute_name(), &value);
                Ok(Some(value))
            }
            None => {
                warn!("Failed to get a successful response for command {}.", name);
                span.set_error("no response");
                Ok(None)
            }
        }
    }

    /// Vehicle identification number, with adapter fixups applied
    pub async fn read_vin(&mut self) -> Option<String> {
        match self.get_reading(commands::VIN).await {
            Ok(Some(PhysicalValue::Text(vin))) => {
                let vin = self.connection.normalize_vin(vin);
                info!("VIN: {}", vin);
                Some(vin)
            }
            Ok(Some(other)) => {
                warn!("Unexpected VIN value: {}", other);
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("VIN unavailable: {}", e);
                None
            }
        }
    }

    /// Stored trouble code count inside a `get-dtc` span; failures count as 0
    pub async fn get_dtc_count(&mut self) -> usize {
        let mut span = self.tracer.start("get-dtc");
        let result = match self.registry.get(commands::GET_DTC) {
            Ok(command) => self
                .connection
                .query(command)
                .instrument(span.span().clone())
                .await
                .map(|response| response.and_then(|r| command.decode(&r.data)))
                .map_err(PollerError::from),
            Err(e) => Err(e.into()),
        };

        let count = match result {
            Ok(Some(PhysicalValue::Codes(codes))) => {
                for code in &codes {
                    info!("Code: {}", code);
                }
                codes.len()
            }
            Ok(Some(other)) => {
                warn!("Unexpected trouble code value: {}", other);
                0
            }
            Ok(None) => 0,
            Err(e) => {
                warn!("Failed to get DTCs: {}", e);
                span.set_error(e.to_string());
                0
            }
        };

        span.set_metric(metric::DTC_COUNT, count);
        info!("DTC Codes Registered: {}", count);
        count
    }

    /// Hand the connection to a poller and install its watches.
    ///
    /// On failure the connection is released before the error returns.
    pub async fn into_poller(
        self,
        writer: ReadingWriter,
        bindings: Vec<WatchBinding>,
        config: PollerConfig,
    ) -> Result<(Poller, SupportReport), PollerError> {
        if let Err(e) = Poller::check_bindings(&self.registry, &writer, &self.tracer, &bindings) {
            self.close().await;
            return Err(e);
        }
        let mut poller = Poller::new(
            self.connection,
            self.registry,
            writer,
            self.tracer,
            bindings,
            config,
        )?;
        match poller.watch_supported(&self.supported) {
            Ok(report) => Ok((poller, report)),
            Err(e) => {
                poller.stop().await;
                Err(e)
            }
        }
    }

    /// Release the connection without starting the watch loop
    pub async fn close(mut self) {
        self.connection.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::MockTransport;
    use reading_store::ReadingStore;
    use std::io;
    use std::sync::Mutex;
    use telemetry::{AttributeValue, MemoryTraceSink};

    fn tracer() -> (Arc<MemoryTraceSink>, Tracer) {
        let sink = Arc::new(MemoryTraceSink::new());
        (sink.clone(), Tracer::new("vehicle").with_sink(sink))
    }

    /// Formatted log lines written while a capture guard is held
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        (buffer, tracing::subscriber::set_default(subscriber))
    }

    async fn session(transport: &MockTransport) -> (Session, Arc<MemoryTraceSink>) {
        let (sink, tracer) = tracer();
        let session = Session::connect(
            transport,
            "/dev/ttyUSB0",
            Arc::new(CommandRegistry::with_builtin()),
            tracer,
        )
        .await
        .unwrap();
        (session, sink)
    }

    #[tokio::test]
    async fn test_connect_failure_marks_init_span() {
        let transport = MockTransport::new().refuse_connection();
        let (sink, tracer) = tracer();
        let result = Session::connect(
            &transport,
            "/dev/ttyUSB0",
            Arc::new(CommandRegistry::with_builtin()),
            tracer,
        )
        .await;

        assert!(result.is_err());
        let span = sink.find("obd2.init").unwrap();
        assert!(span.is_error());
    }

    #[tokio::test]
    async fn test_check_support() {
        let transport = MockTransport::new().supported(["VIN", "MILEAGE"]);
        let (session, sink) = session(&transport).await;
        assert!(!sink.find("obd2.init").unwrap().is_error());

        let report = session.check_support(["VIN", "FUEL_LEVEL", "MILEAGE"]).unwrap();
        assert_eq!(report.supported, vec!["VIN", "MILEAGE"]);
        assert_eq!(report.unsupported, vec!["FUEL_LEVEL"]);
        assert!(matches!(
            session.check_support(["OBD_COMPLIANCE"]),
            Err(PollerError::Registry(_))
        ));
    }

    #[tokio::test]
    async fn test_get_reading_sets_metric_attribute() {
        let transport = MockTransport::new().respond("FUEL_LEVEL", vec![0x41, 0x2F, 0xFF]);
        let (mut session, sink) = session(&transport).await;

        let value = session.get_reading("FUEL_LEVEL").await.unwrap();
        assert_eq!(value, Some(PhysicalValue::Number(100.0)));
        let span = sink.find("get-reading-FUEL_LEVEL").unwrap();
        assert_eq!(
            span.attribute("vehicle.fuel.level"),
            Some(&AttributeValue::Float(100.0))
        );
    }

    #[tokio::test]
    async fn test_get_reading_unknown_command() {
        let transport = MockTransport::new();
        let (mut session, sink) = session(&transport).await;
        assert!(matches!(
            session.get_reading("RPM").await,
            Err(PollerError::Registry(_))
        ));
        assert!(sink.find("get-reading-RPM").unwrap().is_error());
    }

    #[tokio::test]
    async fn test_get_reading_without_response() {
        let transport = MockTransport::new();
        let (mut session, sink) = session(&transport).await;
        assert_eq!(session.get_reading("FUEL_LEVEL").await.unwrap(), None);
        assert!(sink.find("get-reading-FUEL_LEVEL").unwrap().is_error());
    }

    #[tokio::test]
    async fn test_read_vin() {
        let mut frame = vec![0x49, 0x02, 0x01];
        frame.extend_from_slice(b"1FTFW1ET5DFC10312");
        let transport = MockTransport::new().respond("VIN", frame);
        let (mut session, _sink) = session(&transport).await;
        assert_eq!(session.read_vin().await.as_deref(), Some("1FTFW1ET5DFC10312"));
    }

    #[tokio::test]
    async fn test_dtc_count() {
        let transport =
            MockTransport::new().respond("GET_DTC", vec![0x43, 0x02, 0x01, 0x33, 0x41, 0x23]);
        let (mut session, sink) = session(&transport).await;

        assert_eq!(session.get_dtc_count().await, 2);
        let span = sink.find("get-dtc").unwrap();
        assert_eq!(
            span.attribute("vehicle.dtc.count"),
            Some(&AttributeValue::Int(2))
        );
    }

    #[tokio::test]
    async fn test_dtc_failure_counts_zero() {
        let transport = MockTransport::new().fail_query("GET_DTC");
        let (mut session, sink) = session(&transport).await;

        assert_eq!(session.get_dtc_count().await, 0);
        let span = sink.find("get-dtc").unwrap();
        assert!(span.is_error());
        assert_eq!(
            span.attribute("vehicle.dtc.count"),
            Some(&AttributeValue::Int(0))
        );
    }

    #[tokio::test]
    async fn test_dtc_failure_logs_warning() {
        let (buffer, _guard) = capture_logs();
        let transport = MockTransport::new().fail_query("GET_DTC");
        let (mut session, _sink) = session(&transport).await;

        assert_eq!(session.get_dtc_count().await, 0);
        let logs = buffer.contents();
        assert!(
            logs.lines()
                .any(|line| line.contains("WARN") && line.contains("Failed to get DTCs")),
            "{logs}"
        );
        assert!(logs.contains("DTC Codes Registered: 0"), "{logs}");
    }

    #[tokio::test]
    async fn test_failed_handoff_releases_connection() {
        let transport = MockTransport::new();
        let stats = transport.stats();
        let (session, _sink) = session(&transport).await;
        // no slot for the mileage binding
        let (writer, _reader) = ReadingStore::new(["vehicle.fuel.level"]);

        let result = session
            .into_poller(writer, WatchBinding::defaults(), PollerConfig::default())
            .await;
        assert!(matches!(result, Err(PollerError::Store(_))));
        assert_eq!(stats.releases(), 1);
    }

    #[tokio::test]
    async fn test_context_vin_on_later_spans() {
        let transport = MockTransport::new();
        let (mut session, sink) = session(&transport).await;
        session.set_context(Arc::new(VehicleContext {
            vin: Some("2C3CDXBG0EH123456".into()),
            ..Default::default()
        }));
        session.get_dtc_count().await;
        assert_eq!(
            sink.find("get-dtc").unwrap().attribute("vehicle.vin"),
            Some(&AttributeValue::Str("2C3CDXBG0EH123456".into()))
        );
    }
}

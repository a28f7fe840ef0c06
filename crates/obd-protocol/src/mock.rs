//! Scripted in-memory transport
//!
//! Stands in for a real adapter in tests and in demo runs without hardware.

use crate::command::DiagnosticCommand;
use crate::commands;
use crate::error::ObdError;
use crate::registry::CommandRegistry;
use crate::transport::{Connection, Response, Transport};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Counters shared between a [`MockTransport`] and its connections
#[derive(Debug, Default)]
pub struct MockStats {
    pub connects: AtomicUsize,
    pub queries: AtomicUsize,
    pub releases: AtomicUsize,
}

impl MockStats {
    /// Number of successful connects
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of one-shot queries issued
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Number of times a connection was actually released
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct MockScript {
    /// `None` reports every registered command as supported
    supported: Option<HashSet<String>>,
    responses: HashMap<String, Vec<u8>>,
    streams: HashMap<String, Vec<Vec<u8>>>,
    failing: HashSet<String>,
    refuse_connect: bool,
    frame_interval: Duration,
    repeat: bool,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            supported: None,
            responses: HashMap::new(),
            streams: HashMap::new(),
            failing: HashSet::new(),
            refuse_connect: false,
            frame_interval: Duration::from_millis(100),
            repeat: false,
        }
    }
}

/// Transport returning scripted frames
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    script: MockScript,
    stats: Arc<MockStats>,
}

impl MockTransport {
    /// Create a transport with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Demo script: a drifting fuel level and odometer, a VIN and one stored code
    pub fn demo() -> Self {
        let fuel = (0..20u8).map(|i| vec![0x41, 0x2F, 200 - i * 3]).collect();
        let odometer = (0..20u32)
            .map(|i| {
                let mut frame = vec![0x41, 0xA6];
                frame.extend_from_slice(&(1_234_560 + i * 3).to_be_bytes());
                frame
            })
            .collect();

        let mut vin = vec![0x49, 0x02, 0x01];
        vin.extend_from_slice(b"1FTFW1ET5DFC10312");

        Self::new()
            .respond(commands::VIN, vin)
            .respond(commands::GET_DTC, vec![0x43, 0x01, 0x01, 0x33])
            .stream(commands::FUEL_LEVEL, fuel)
            .stream(commands::MILEAGE, odometer)
            .frame_interval(Duration::from_secs(1))
            .repeat(true)
    }

    /// Restrict the supported set to these command names
    pub fn supported<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script.supported = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Frame returned by one-shot queries of `command`
    pub fn respond(mut self, command: &str, frame: Vec<u8>) -> Self {
        self.script.responses.insert(command.to_string(), frame);
        self
    }

    /// Frames delivered, in order, while `command` is watched
    pub fn stream(mut self, command: &str, frames: Vec<Vec<u8>>) -> Self {
        self.script.streams.insert(command.to_string(), frames);
        self
    }

    /// Make queries of `command` fail with a transport error
    pub fn fail_query(mut self, command: &str) -> Self {
        self.script.failing.insert(command.to_string());
        self
    }

    /// Make `connect` fail
    pub fn refuse_connection(mut self) -> Self {
        self.script.refuse_connect = true;
        self
    }

    /// Delay between streamed frames
    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.script.frame_interval = interval;
        self
    }

    /// Cycle through stream frames forever instead of stopping at the end
    pub fn repeat(mut self, repeat: bool) -> Self {
        self.script.repeat = repeat;
        self
    }

    /// Counters shared with every connection this transport opens
    pub fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, device: &str) -> Result<Box<dyn Connection>, ObdError> {
        if self.script.refuse_connect {
            return Err(ObdError::SerialError(format!("cannot open {device}")));
        }
        info!("Mock adapter connected on {}", device);
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            script: self.script.clone(),
            stats: self.stats.clone(),
            watched: Vec::new(),
            worker: None,
            connected: true,
        }))
    }
}

/// Connection produced by [`MockTransport`]
pub struct MockConnection {
    script: MockScript,
    stats: Arc<MockStats>,
    watched: Vec<DiagnosticCommand>,
    worker: Option<(watch::Sender<bool>, JoinHandle<()>)>,
    connected: bool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn supported_commands(
        &mut self,
        registry: &CommandRegistry,
    ) -> Result<HashSet<String>, ObdError> {
        let names = registry.iter().map(|c| c.name().to_string());
        Ok(match &self.script.supported {
            Some(supported) => names.filter(|n| supported.contains(n)).collect(),
            None => names.collect(),
        })
    }

    async fn query(&mut self, command: &DiagnosticCommand) -> Result<Option<Response>, ObdError> {
        if !self.connected {
            return Err(ObdError::ConnectionClosed);
        }
        self.stats.queries.fetch_add(1, Ordering::SeqCst);
        if self.script.failing.contains(command.name()) {
            return Err(ObdError::Timeout(100));
        }
        Ok(self
            .script
            .responses
            .get(command.name())
            .map(|frame| Response::new(command.name(), frame.clone())))
    }

    fn watch(&mut self, command: DiagnosticCommand) -> Result<(), ObdError> {
        if !self.connected {
            return Err(ObdError::ConnectionClosed);
        }
        self.watched.push(command);
        Ok(())
    }

    fn start(&mut self, events: mpsc::Sender<Response>) -> Result<(), ObdError> {
        if !self.connected {
            return Err(ObdError::ConnectionClosed);
        }
        let streams: Vec<(String, Vec<Vec<u8>>)> = self
            .watched
            .iter()
            .filter_map(|c| {
                let frames = self.script.streams.get(c.name()).filter(|f| !f.is_empty())?;
                Some((c.name().to_string(), frames.clone()))
            })
            .collect();
        let interval = self.script.frame_interval;
        let repeat = self.script.repeat;
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let longest = streams.iter().map(|(_, f)| f.len()).max().unwrap_or(0);
            let mut step = 0usize;
            while longest > 0 && (repeat || step < longest) {
                for (name, frames) in &streams {
                    let frame = if repeat {
                        frames.get(step % frames.len())
                    } else {
                        frames.get(step)
                    };
                    if let Some(frame) = frame {
                        if events.send(Response::new(name.clone(), frame.clone())).await.is_err() {
                            return;
                        }
                    }
                }
                step += 1;
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop_rx.changed() => return,
                }
            }
            debug!("Mock stream exhausted");
        });

        self.worker = Some((stop_tx, handle));
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some((stop_tx, handle)) = self.worker.take() {
            let _ = stop_tx.send(true);
            let _ = handle.await;
        }
        if self.connected {
            self.connected = false;
            self.stats.releases.fetch_add(1, Ordering::SeqCst);
            info!("Mock adapter released");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refused_connection() {
        let transport = MockTransport::new().refuse_connection();
        assert!(transport.connect("mock").await.is_err());
        assert_eq!(transport.stats().connects(), 0);
    }

    #[tokio::test]
    async fn test_supported_subset() {
        let transport = MockTransport::new().supported(["FUEL_LEVEL"]);
        let mut conn = transport.connect("mock").await.unwrap();
        let supported = conn
            .supported_commands(&CommandRegistry::with_builtin())
            .await
            .unwrap();
        assert_eq!(supported.len(), 1);
        assert!(supported.contains("FUEL_LEVEL"));
    }

    #[tokio::test]
    async fn test_query_scripted_and_failing() {
        let transport = MockTransport::new()
            .respond("FUEL_LEVEL", vec![0x41, 0x2F, 0x80])
            .fail_query("GET_DTC");
        let mut conn = transport.connect("mock").await.unwrap();

        let response = conn.query(&commands::fuel_level()).await.unwrap().unwrap();
        assert_eq!(response.data, vec![0x41, 0x2F, 0x80]);
        assert!(conn.query(&commands::vin()).await.unwrap().is_none());
        assert!(conn.query(&commands::get_dtc()).await.is_err());
        assert_eq!(transport.stats().queries(), 3);
    }

    #[tokio::test]
    async fn test_stream_and_idempotent_stop() {
        let transport = MockTransport::new()
            .stream("FUEL_LEVEL", vec![vec![0x41, 0x2F, 0x10], vec![0x41, 0x2F, 0x20]])
            .frame_interval(Duration::from_millis(1));
        let mut conn = transport.connect("mock").await.unwrap();
        conn.watch(commands::fuel_level()).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        conn.start(tx).unwrap();
        assert_eq!(rx.recv().await.unwrap().data[2], 0x10);
        assert_eq!(rx.recv().await.unwrap().data[2], 0x20);

        conn.stop().await;
        conn.stop().await;
        assert!(!conn.is_connected());
        assert_eq!(transport.stats().releases(), 1);
    }
}

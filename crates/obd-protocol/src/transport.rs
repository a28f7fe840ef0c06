//! Transport Adapter Interface
//!
//! The agent talks to the bus only through these traits. Watched responses
//! are delivered as [`Response`] messages on an mpsc channel handed to
//! [`Connection::start`].

use crate::command::DiagnosticCommand;
use crate::error::ObdError;
use crate::registry::CommandRegistry;
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::mpsc;

/// Raw response frame for one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Name of the command that produced this frame
    pub command: String,
    /// Frame bytes, protocol header included
    pub data: Vec<u8>,
}

impl Response {
    pub fn new(command: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            command: command.into(),
            data,
        }
    }
}

/// Opens connections to a diagnostics adapter
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the adapter at `device` (e.g. "/dev/ttyUSB0")
    async fn connect(&self, device: &str) -> Result<Box<dyn Connection>, ObdError>;
}

/// A live adapter connection
#[async_trait]
pub trait Connection: Send {
    /// Names of the registered commands the vehicle answers
    async fn supported_commands(
        &mut self,
        registry: &CommandRegistry,
    ) -> Result<HashSet<String>, ObdError>;

    /// One-shot query; `Ok(None)` when the vehicle returned no data
    async fn query(&mut self, command: &DiagnosticCommand) -> Result<Option<Response>, ObdError>;

    /// Add a standing watch; takes effect on the next [`Connection::start`]
    fn watch(&mut self, command: DiagnosticCommand) -> Result<(), ObdError>;

    /// Begin delivering watched responses to `events`
    fn start(&mut self, events: mpsc::Sender<Response>) -> Result<(), ObdError>;

    /// Stop all watches and release the adapter. Safe to call repeatedly.
    async fn stop(&mut self);

    fn is_connected(&self) -> bool;

    /// Adapter-specific VIN fixups; identity unless the adapter is known to
    /// mangle the VIN.
    fn normalize_vin(&self, vin: String) -> String {
        vin
    }
}

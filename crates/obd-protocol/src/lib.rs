//! OBD-II Protocol Implementation
//!
//! Command registry, response decoders and transport adapters for the
//! telemetry agent. The ELM327 adapter speaks to serial OBD-II dongles;
//! the mock adapter replays scripted frames.

mod command;
pub mod commands;
pub mod decode;
mod elm327;
mod error;
mod mock;
mod protocol;
mod registry;
mod transport;

pub use command::{DiagnosticCommand, Ecu, PhysicalValue};
pub use elm327::{decode_pid_bitmask, parse_response, Elm327Config, Elm327Connection, Elm327Transport};
pub use error::{ObdError, RegistryError};
pub use mock::{MockConnection, MockStats, MockTransport};
pub use protocol::ObdProtocol;
pub use registry::CommandRegistry;
pub use transport::{Connection, Response, Transport};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Diagnostic trouble codes
    pub const READ_DTC: u8 = 0x03;
    /// Pending trouble codes
    pub const PENDING_DTC: u8 = 0x07;
    /// Vehicle information
    pub const VEHICLE_INFO: u8 = 0x09;
    /// Permanent trouble codes
    pub const PERMANENT_DTC: u8 = 0x0A;
}

//! OBD-II Error Types

use thiserror::Error;

/// Errors that can occur during OBD-II communication
#[derive(Debug, Error)]
pub enum ObdError {
    /// Serial port connection error
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Timeout waiting for response
    #[error("Timeout waiting for OBD response after {0}ms")]
    Timeout(u64),

    /// Invalid response from adapter
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Adapter rejected the command (`?` reply)
    #[error("Adapter rejected command {0}")]
    CommandRejected(String),

    /// Adapter not responding
    #[error("OBD adapter not responding")]
    AdapterNotResponding,

    /// Vehicle not connected
    #[error("Vehicle ignition is off or not connected")]
    VehicleNotConnected,

    /// Connection was already stopped
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Registry contract violation
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}

impl From<tokio_serial::Error> for ObdError {
    fn from(err: tokio_serial::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}

/// Command registry contract violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A command with the same name is already registered
    #[error("Command {0} is already registered")]
    DuplicateCommand(String),

    /// No command with this name was registered
    #[error("Command {0} is not registered")]
    UnknownCommand(String),

    /// Named decoder does not exist
    #[error("Unknown decoder: {0}")]
    UnknownDecoder(String),

    /// Request code is not an even-length hex string
    #[error("Invalid request code for {name}: {request}")]
    InvalidRequest { name: String, request: String },
}

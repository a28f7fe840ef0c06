//! Diagnostic Command Definitions
//!
//! A [`DiagnosticCommand`] describes how one parameter is requested from the
//! bus and how its response frame is turned into a physical value. Built-in
//! and vendor-defined commands share this one representation.

use crate::decode::{self, DecodeFn};
use crate::error::RegistryError;
use crate::mode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Controller expected to answer a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecu {
    /// Any controller on the bus
    #[default]
    All,
    /// Engine control module
    Engine,
    /// Transmission control module
    Transmission,
}

/// Decoded value of a response frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PhysicalValue {
    /// Scalar measurement in the command's unit
    Number(f64),
    /// Text value (e.g. VIN)
    Text(String),
    /// Diagnostic trouble codes
    Codes(Vec<String>),
}

impl PhysicalValue {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PhysicalValue::Number(v) => Some(*v),
            PhysicalValue::Codes(codes) => Some(codes.len() as f64),
            PhysicalValue::Text(_) => None,
        }
    }

    /// Text view of the value, if it is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PhysicalValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PhysicalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysicalValue::Number(v) => write!(f, "{v}"),
            PhysicalValue::Text(s) => f.write_str(s),
            PhysicalValue::Codes(codes) => f.write_str(&codes.join(",")),
        }
    }
}

/// A queryable diagnostic parameter
#[derive(Debug, Clone)]
pub struct DiagnosticCommand {
    name: String,
    description: String,
    /// Request bytes, service mode first
    request: Vec<u8>,
    /// Minimum frame length including header bytes
    expected_bytes: usize,
    /// Leading bytes stripped before payload interpretation
    header_len: usize,
    decoder: DecodeFn,
    ecu: Ecu,
    extended: bool,
}

impl DiagnosticCommand {
    /// Create a command from its binary request code
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        request: &[u8],
        expected_bytes: usize,
        decoder: DecodeFn,
        ecu: Ecu,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            request: request.to_vec(),
            expected_bytes,
            header_len: header_len_for(request),
            decoder,
            ecu,
            extended: false,
        }
    }

    /// Create a user-defined command from a hex request code such as `"01A6"`
    /// and a decoder name from the decoder table.
    pub fn custom(
        name: &str,
        description: &str,
        request_hex: &str,
        expected_bytes: usize,
        decoder: &str,
        ecu: Ecu,
    ) -> Result<Self, RegistryError> {
        let request = parse_request(request_hex).ok_or_else(|| RegistryError::InvalidRequest {
            name: name.to_string(),
            request: request_hex.to_string(),
        })?;
        let decoder = decode::by_name(decoder)
            .ok_or_else(|| RegistryError::UnknownDecoder(decoder.to_string()))?;

        Ok(Self::new(name, description, &request, expected_bytes, decoder, ecu).extended())
    }

    /// Mark this command as vendor-defined
    pub fn extended(mut self) -> Self {
        self.extended = true;
        self
    }

    /// Registry key, e.g. `FUEL_LEVEL`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Raw request bytes, service mode first
    pub fn request(&self) -> &[u8] {
        &self.request
    }

    /// Request as sent to an ELM327 adapter, e.g. `"01A6"`
    pub fn request_code(&self) -> String {
        self.request.iter().map(|b| format!("{b:02X}")).collect()
    }

    /// Service mode byte
    pub fn mode(&self) -> u8 {
        self.request.first().copied().unwrap_or_default()
    }

    /// PID byte, if the service takes one
    pub fn pid(&self) -> Option<u8> {
        self.request.get(1).copied()
    }

    /// Minimum frame length, header included
    pub fn expected_bytes(&self) -> usize {
        self.expected_bytes
    }

    /// Leading frame bytes that are not payload
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Minimum payload length after the header is stripped
    pub fn payload_len(&self) -> usize {
        self.expected_bytes.saturating_sub(self.header_len)
    }

    /// Controller expected to answer
    pub fn ecu(&self) -> Ecu {
        self.ecu
    }

    /// Check if this is a vendor-defined command
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Decode a raw response frame.
    ///
    /// Returns `None` when the frame is too short once the header is
    /// stripped, or when the decoder rejects the payload.
    pub fn decode(&self, frame: &[u8]) -> Option<PhysicalValue> {
        let payload = frame.get(self.header_len..)?;
        if payload.len() < self.payload_len() {
            return None;
        }
        (self.decoder)(payload)
    }

    /// Decoded attribute name, e.g. `FUEL_LEVEL` -> `fuel.level`
    pub fn attribute_name(&self) -> String {
        self.name.to_lowercase().replace('_', ".")
    }
}

impl PartialEq for DiagnosticCommand {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for DiagnosticCommand {}

/// Response header length: echoed request bytes, plus a count byte for
/// services that prefix their data with one. Frames follow the CAN layout;
/// adapters on other buses rebuild it before decoding.
fn header_len_for(request: &[u8]) -> usize {
    let counted = matches!(
        request.first().copied(),
        Some(mode::READ_DTC | mode::PENDING_DTC | mode::PERMANENT_DTC | mode::VEHICLE_INFO)
    );
    request.len() + usize::from(counted)
}

fn parse_request(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.trim();
    if hex.is_empty() || hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands;

    #[test]
    fn test_header_len_by_service() {
        assert_eq!(commands::fuel_level().header_len(), 2);
        assert_eq!(commands::mileage().header_len(), 2);
        assert_eq!(commands::get_dtc().header_len(), 2);
        assert_eq!(commands::vin().header_len(), 3);
    }

    #[test]
    fn test_custom_command() {
        let cmd = DiagnosticCommand::custom("ODO", "Odometer", "01a6", 6, "mileage", Ecu::Engine)
            .unwrap();
        assert_eq!(cmd.request(), &[0x01, 0xA6]);
        assert_eq!(cmd.request_code(), "01A6");
        assert!(cmd.is_extended());
        assert_eq!(cmd.payload_len(), 4);
        assert_eq!(cmd.pid(), Some(0xA6));
    }

    #[test]
    fn test_custom_command_rejects_bad_input() {
        let err = DiagnosticCommand::custom("X", "", "1A6", 6, "mileage", Ecu::Engine).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRequest { .. }));

        let err = DiagnosticCommand::custom("X", "", "01ZZ", 6, "mileage", Ecu::Engine).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRequest { .. }));

        let err = DiagnosticCommand::custom("X", "", "01A6", 6, "warp", Ecu::Engine).unwrap_err();
        assert_eq!(err, RegistryError::UnknownDecoder("warp".to_string()));
    }

    #[test]
    fn test_decode_strips_header() {
        let cmd = commands::fuel_level();
        // 41 2F FF => 100%
        assert_eq!(cmd.decode(&[0x41, 0x2F, 0xFF]), Some(PhysicalValue::Number(100.0)));
        // header only
        assert_eq!(cmd.decode(&[0x41, 0x2F]), None);
        assert_eq!(cmd.decode(&[]), None);
    }

    #[test]
    fn test_attribute_name() {
        assert_eq!(commands::fuel_level().attribute_name(), "fuel.level");
        assert_eq!(commands::vin().attribute_name(), "vin");
    }
}

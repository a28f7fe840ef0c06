//! Built-in commands used by the agent

use crate::command::{DiagnosticCommand, Ecu};
use crate::decode;

pub const FUEL_LEVEL: &str = "FUEL_LEVEL";
pub const VIN: &str = "VIN";
pub const GET_DTC: &str = "GET_DTC";
pub const MILEAGE: &str = "MILEAGE";

/// Fuel tank level input, percent (mode 01 PID 2F)
pub fn fuel_level() -> DiagnosticCommand {
    DiagnosticCommand::new(FUEL_LEVEL, "Fuel Level Input", &[0x01, 0x2F], 3, decode::percent, Ecu::Engine)
}

/// Vehicle identification number (mode 09 PID 02)
pub fn vin() -> DiagnosticCommand {
    DiagnosticCommand::new(VIN, "Vehicle Identification Number", &[0x09, 0x02], 4, decode::vin, Ecu::Engine)
}

/// Stored diagnostic trouble codes (mode 03)
pub fn get_dtc() -> DiagnosticCommand {
    DiagnosticCommand::new(GET_DTC, "Get DTCs", &[0x03], 2, decode::dtc_list, Ecu::All)
}

/// Odometer (mode 01 PID A6).
///
/// Scaling follows the firmware this agent was first deployed against:
/// tenths of a kilometer, reported in miles. Other vehicles may need a
/// different command declared in configuration.
pub fn mileage() -> DiagnosticCommand {
    DiagnosticCommand::new(MILEAGE, "Vehicle Mileage", &[0x01, 0xA6], 6, decode::mileage, Ecu::Engine)
        .extended()
}

/// All built-in commands, standard ones first
pub fn builtin() -> Vec<DiagnosticCommand> {
    vec![vin(), fuel_level(), get_dtc(), mileage()]
}

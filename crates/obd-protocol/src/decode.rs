//! Response Payload Decoders
//!
//! Pure transforms from a header-stripped payload to a physical value.
//! A decoder returns `None` instead of failing when the payload cannot be
//! interpreted.

use crate::command::PhysicalValue;

/// Decoder function signature
pub type DecodeFn = fn(&[u8]) -> Option<PhysicalValue>;

/// Kilometers to statute miles
pub const KM_TO_MILES: f64 = 0.621371;

/// Look up a decoder by the name used in configuration files
pub fn by_name(name: &str) -> Option<DecodeFn> {
    let decoder: DecodeFn = match name {
        "percent" => percent,
        "mileage" => mileage,
        "vin" => vin,
        "dtc" => dtc_list,
        "uint" => uint,
        _ => return None,
    };
    Some(decoder)
}

/// Percentage: A * 100 / 255
pub fn percent(payload: &[u8]) -> Option<PhysicalValue> {
    let a = *payload.first()?;
    Some(PhysicalValue::Number(a as f64 * 100.0 / 255.0))
}

/// Odometer in miles from a big-endian u32 of tenths of a kilometer.
///
/// `miles = round((raw / 10.0) * 0.621371, 2)`
pub fn mileage(payload: &[u8]) -> Option<PhysicalValue> {
    let bytes: [u8; 4] = payload.get(..4)?.try_into().ok()?;
    let raw = u32::from_be_bytes(bytes);
    let km = raw as f64 / 10.0;
    Some(PhysicalValue::Number(round2(km * KM_TO_MILES)))
}

/// VIN as ASCII text; padding and non-printable bytes are dropped
pub fn vin(payload: &[u8]) -> Option<PhysicalValue> {
    let text: String = payload
        .iter()
        .filter(|b| b.is_ascii_alphanumeric())
        .map(|&b| b as char)
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(PhysicalValue::Text(text))
    }
}

/// Stored trouble codes, two bytes per code; `00 00` pairs are padding
pub fn dtc_list(payload: &[u8]) -> Option<PhysicalValue> {
    let codes = payload
        .chunks_exact(2)
        .filter(|pair| pair[0] != 0 || pair[1] != 0)
        .map(|pair| format_dtc(pair[0], pair[1]))
        .collect();
    Some(PhysicalValue::Codes(codes))
}

/// Big-endian unsigned integer of up to 8 payload bytes
pub fn uint(payload: &[u8]) -> Option<PhysicalValue> {
    if payload.is_empty() || payload.len() > 8 {
        return None;
    }
    let value = payload.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
    Some(PhysicalValue::Number(value as f64))
}

/// Format a trouble code, e.g. `01 33` -> `P0133`, `C1 23` -> `U0123`
pub fn format_dtc(a: u8, b: u8) -> String {
    let system = match a >> 6 {
        0 => 'P',
        1 => 'C',
        2 => 'B',
        _ => 'U',
    };
    format!("{}{}{:01X}{:02X}", system, (a >> 4) & 0x03, a & 0x0F, b)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

//! OBD-II Protocol Definitions

use serde::{Deserialize, Serialize};

/// Bus protocols selectable on an ELM327 adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObdProtocol {
    /// Automatic protocol detection
    #[default]
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    J1850Vpw,
    /// ISO 9141-2 (10.4 kbaud, 5 baud init)
    Iso9141_2,
    /// ISO 14230-4 KWP (slow init, 10.4 kbaud)
    Iso14230_4Kwp,
    /// ISO 14230-4 KWP (fast init, 10.4 kbaud)
    Iso14230_4KwpFast,
    /// ISO 15765-4 CAN (11 bit ID, 500 kbaud)
    Iso15765_4Can11bit500,
    /// ISO 15765-4 CAN (29 bit ID, 500 kbaud)
    Iso15765_4Can29bit500,
    /// ISO 15765-4 CAN (11 bit ID, 250 kbaud)
    Iso15765_4Can11bit250,
    /// ISO 15765-4 CAN (29 bit ID, 250 kbaud)
    Iso15765_4Can29bit250,
}

const BY_NUMBER: [ObdProtocol; 10] = [
    ObdProtocol::Auto,
    ObdProtocol::J1850Pwm,
    ObdProtocol::J1850Vpw,
    ObdProtocol::Iso9141_2,
    ObdProtocol::Iso14230_4Kwp,
    ObdProtocol::Iso14230_4KwpFast,
    ObdProtocol::Iso15765_4Can11bit500,
    ObdProtocol::Iso15765_4Can29bit500,
    ObdProtocol::Iso15765_4Can11bit250,
    ObdProtocol::Iso15765_4Can29bit250,
];

impl ObdProtocol {
    /// ELM327 protocol number (the digit in `ATSPn`)
    pub fn number(&self) -> u8 {
        BY_NUMBER.iter().position(|p| p == self).unwrap_or_default() as u8
    }

    /// `ATSPn` command selecting this protocol
    pub fn to_elm_command(&self) -> String {
        format!("ATSP{}", self.number())
    }

    /// Parse an `ATDPN` reply such as `"A6"` (auto-detected CAN 11/500) or `"3"`
    pub fn from_dpn(reply: &str) -> Option<Self> {
        let digit = reply.trim().trim_start_matches('A');
        let n = u8::from_str_radix(digit, 16).ok()?;
        BY_NUMBER.get(n as usize).copied()
    }

    /// Check if this is a CAN protocol
    pub fn is_can(&self) -> bool {
        matches!(
            self,
            ObdProtocol::Iso15765_4Can11bit500
                | ObdProtocol::Iso15765_4Can29bit500
                | ObdProtocol::Iso15765_4Can11bit250
                | ObdProtocol::Iso15765_4Can29bit250
        )
    }

    /// J1850 and ISO 9141/14230 buses, where every reply line is a
    /// complete message carrying its own header
    pub fn is_legacy(&self) -> bool {
        !self.is_can() && *self != ObdProtocol::Auto
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elm_command() {
        assert_eq!(ObdProtocol::Auto.to_elm_command(), "ATSP0");
        assert_eq!(ObdProtocol::Iso15765_4Can11bit500.to_elm_command(), "ATSP6");
    }

    #[test]
    fn test_from_dpn() {
        assert_eq!(ObdProtocol::from_dpn("A6"), Some(ObdProtocol::Iso15765_4Can11bit500));
        assert_eq!(ObdProtocol::from_dpn("3\r"), Some(ObdProtocol::Iso9141_2));
        assert_eq!(ObdProtocol::from_dpn("AC"), None);
        assert!(ObdProtocol::from_dpn("A7").is_some_and(|p| p.is_can()));
    }

    #[test]
    fn test_legacy_buses() {
        assert!(ObdProtocol::Iso9141_2.is_legacy());
        assert!(ObdProtocol::J1850Vpw.is_legacy());
        assert!(!ObdProtocol::Iso15765_4Can11bit500.is_legacy());
        assert!(!ObdProtocol::Auto.is_legacy());
    }
}

//! ELM327 Adapter
//!
//! Async serial transport for ELM327-compatible OBD-II adapters. Commands
//! are written as ASCII hex terminated by `\r`; the adapter replies with
//! hex lines followed by a `>` prompt.

use crate::command::DiagnosticCommand;
use crate::error::ObdError;
use crate::mode;
use crate::protocol::ObdProtocol;
use crate::registry::CommandRegistry;
use crate::transport::{Connection, Response, Transport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// Default timeout for OBD commands
const DEFAULT_TIMEOUT_MS: u64 = 2000;

const PROMPT: u8 = b'>';

/// ELM327 adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Elm327Config {
    /// Serial baud rate
    pub baud_rate: u32,
    /// Bus protocol (`auto` lets the adapter search)
    pub protocol: ObdProtocol,
    /// Per-command reply timeout
    pub timeout_ms: u64,
    /// Pause between passes over the watched commands
    pub query_interval_ms: u64,
    /// Restore the leading '1' some adapters drop from the VIN
    pub pad_short_vin: bool,
}

impl Default for Elm327Config {
    fn default() -> Self {
        Self {
            baud_rate: 38400,
            protocol: ObdProtocol::Auto,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            query_interval_ms: 250,
            pad_short_vin: true,
        }
    }
}

/// Opens ELM327 adapters over a serial port
#[derive(Debug, Clone, Default)]
pub struct Elm327Transport {
    config: Elm327Config,
}

impl Elm327Transport {
    /// Create a transport opening adapters with `config`
    pub fn new(config: Elm327Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for Elm327Transport {
    async fn connect(&self, device: &str) -> Result<Box<dyn Connection>, ObdError> {
        info!("Opening ELM327 adapter on {} at {} baud", device, self.config.baud_rate);
        let stream = tokio_serial::new(device, self.config.baud_rate)
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .open_native_async()?;
        let connection = Elm327Connection::initialize(stream, self.config.clone()).await?;
        Ok(Box::new(connection))
    }
}

/// Request/response framing over the adapter's byte stream
struct Elm327Port<S> {
    stream: S,
    timeout: Duration,
    /// Bus in use; decides how multi-line replies are joined
    protocol: ObdProtocol,
}

impl<S> Elm327Port<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Send a command and return the reply text without the prompt
    async fn send(&mut self, command: &str) -> Result<String, ObdError> {
        debug!("ELM327 >> {}", command);
        self.stream.write_all(format!("{command}\r").as_bytes()).await?;
        self.stream.flush().await?;

        let timeout = self.timeout;
        let reply = tokio::time::timeout(timeout, self.read_until_prompt())
            .await
            .map_err(|_| ObdError::Timeout(timeout.as_millis() as u64))??;
        debug!("ELM327 << {:?}", reply);
        Ok(reply)
    }

    async fn read_until_prompt(&mut self) -> Result<String, ObdError> {
        let mut reply = Vec::new();
        let mut chunk = [0u8; 64];
        loop {
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(ObdError::AdapterNotResponding);
            }
            reply.extend_from_slice(&chunk[..n]);
            if let Some(pos) = reply.iter().position(|&b| b == PROMPT) {
                reply.truncate(pos);
                return Ok(String::from_utf8_lossy(&reply).into_owned());
            }
        }
    }

    /// Send an OBD request and parse the reply frame
    async fn request(&mut self, request_code: &str) -> Result<Option<Vec<u8>>, ObdError> {
        let reply = self.send(request_code).await?;
        parse_response(request_code, &reply, self.protocol)
    }
}

/// Live ELM327 connection
pub struct Elm327Connection<S = SerialStream> {
    /// `None` once released
    port: Option<Arc<Mutex<Elm327Port<S>>>>,
    config: Elm327Config,
    protocol: ObdProtocol,
    watched: Vec<DiagnosticCommand>,
    worker: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl<S> Elm327Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Reset and configure the adapter, then check that the vehicle answers
    pub async fn initialize(stream: S, config: Elm327Config) -> Result<Self, ObdError> {
        let mut port = Elm327Port {
            stream,
            timeout: Duration::from_millis(config.timeout_ms),
            protocol: config.protocol,
        };

        let banner = port.send("ATZ").await?;
        if !banner.contains("ELM") {
            warn!("Unexpected adapter banner: {:?}", banner.trim());
        }

        // echo off, linefeeds off, spaces off, headers off
        for setting in ["ATE0", "ATL0", "ATS0", "ATH0"] {
            expect_ok(setting, &port.send(setting).await?)?;
        }
        let select = config.protocol.to_elm_command();
        expect_ok(&select, &port.send(&select).await?)?;

        if port.request("0100").await?.is_none() {
            return Err(ObdError::VehicleNotConnected);
        }

        let protocol = ObdProtocol::from_dpn(&port.send("ATDPN").await?).unwrap_or(config.protocol);
        port.protocol = protocol;
        info!(
            "OBD adapter initialized successfully, protocol {:?} (CAN: {})",
            protocol,
            protocol.is_can()
        );

        Ok(Self {
            port: Some(Arc::new(Mutex::new(port))),
            config,
            protocol,
            watched: Vec::new(),
            worker: None,
        })
    }

    /// Protocol negotiated with the vehicle
    pub fn protocol(&self) -> ObdProtocol {
        self.protocol
    }

    fn port(&self) -> Result<Arc<Mutex<Elm327Port<S>>>, ObdError> {
        self.port.clone().ok_or(ObdError::ConnectionClosed)
    }
}

#[async_trait]
impl<S> Connection for Elm327Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn supported_commands(
        &mut self,
        registry: &CommandRegistry,
    ) -> Result<HashSet<String>, ObdError> {
        let port = self.port()?;
        let pids = read_supported_pids(&mut *port.lock().await).await?;
        debug!("Vehicle reports {} supported mode 01 PIDs", pids.len());

        Ok(registry
            .iter()
            .filter(|c| match (c.mode(), c.pid()) {
                (mode::CURRENT_DATA, Some(pid)) => c.is_extended() || pids.contains(&pid),
                _ => true,
            })
            .map(|c| c.name().to_string())
            .collect())
    }

    async fn query(&mut self, command: &DiagnosticCommand) -> Result<Option<Response>, ObdError> {
        let port = self.port()?;
        let frame = port.lock().await.request(&command.request_code()).await?;
        Ok(frame.map(|data| Response::new(command.name(), data)))
    }

    fn watch(&mut self, command: DiagnosticCommand) -> Result<(), ObdError> {
        self.port()?;
        self.watched.push(command);
        Ok(())
    }

    fn start(&mut self, events: mpsc::Sender<Response>) -> Result<(), ObdError> {
        let port = self.port()?;
        if self.worker.is_some() {
            warn!("ELM327 watch loop already running");
            return Ok(());
        }

        let watched = self.watched.clone();
        let interval = Duration::from_millis(self.config.query_interval_ms);
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!("ELM327 watch loop started for {} commands", watched.len());
            loop {
                for command in &watched {
                    if *stop_rx.borrow() {
                        return;
                    }
                    let reply = port.lock().await.request(&command.request_code()).await;
                    match reply {
                        Ok(Some(data)) => {
                            if events.send(Response::new(command.name(), data)).await.is_err() {
                                debug!("Response receiver dropped, stopping watch loop");
                                return;
                            }
                        }
                        Ok(None) => debug!("{} returned no data", command.name()),
                        Err(e) => warn!("Watch query {} failed: {}", command.name(), e),
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop_rx.changed() => return,
                }
            }
        });

        self.worker = Some((stop_tx, handle));
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some((stop_tx, handle)) = self.worker.take() {
            let _ = stop_tx.send(true);
            if let Err(e) = handle.await {
                warn!("ELM327 watch loop ended abnormally: {}", e);
            }
        }
        if let Some(port) = self.port.take() {
            // close the bus session; the port itself closes on drop
            if let Err(e) = port.lock().await.send("ATPC").await {
                debug!("Protocol close failed: {}", e);
            }
            info!("Disconnecting OBD client");
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn normalize_vin(&self, vin: String) -> String {
        if self.config.pad_short_vin && vin.len() == 16 {
            warn!("Adapter returned a 16-character VIN, restoring leading '1'");
            format!("1{vin}")
        } else {
            vin
        }
    }
}

fn expect_ok(command: &str, reply: &str) -> Result<(), ObdError> {
    if reply.contains("OK") {
        Ok(())
    } else {
        Err(ObdError::InvalidResponse(format!("{command}: {}", reply.trim())))
    }
}

/// Walk the `0100`, `0120`, ... bitmask chain
async fn read_supported_pids<S>(port: &mut Elm327Port<S>) -> Result<HashSet<u8>, ObdError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut supported = HashSet::new();
    let mut base = 0x00u8;
    loop {
        let Some(frame) = port.request(&format!("01{base:02X}")).await? else {
            break;
        };
        supported.extend(decode_pid_bitmask(base, &frame));
        match base.checked_add(0x20) {
            Some(next) if supported.contains(&next) => base = next,
            _ => break,
        }
    }
    Ok(supported)
}

/// PIDs flagged in a `41 <base> A B C D` reply; bit 7 of A is `base + 1`
pub fn decode_pid_bitmask(base: u8, frame: &[u8]) -> Vec<u8> {
    if frame.get(1) != Some(&base) {
        return Vec::new();
    }
    let Some(mask) = frame.get(2..6) else {
        return Vec::new();
    };
    (0..32u8)
        .filter(|i| ((mask[(i / 8) as usize] >> (7 - i % 8)) & 1) == 1)
        .filter_map(|i| base.checked_add(i + 1))
        .collect()
}

/// Parse an adapter reply into one canonical frame.
///
/// `Ok(None)` for `NO DATA`. CAN multi-frame replies (`0:`, `1:` ... lines
/// after a byte-count line) are joined and cut to the declared length.
/// On legacy buses (J1850, ISO 9141/14230) each line is a separate message
/// with its own header; these are merged into the CAN layout, so trouble
/// code replies gain a count byte and vehicle info replies are joined in
/// sequence order.
pub fn parse_response(
    request: &str,
    raw: &str,
    protocol: ObdProtocol,
) -> Result<Option<Vec<u8>>, ObdError> {
    let lines: Vec<&str> = raw
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|l| {
            !l.is_empty() && !l.starts_with("SEARCHING") && !l.starts_with("BUS INIT") && *l != request
        })
        .collect();

    if lines.is_empty() {
        return Err(ObdError::InvalidResponse(format!("empty reply to {request}")));
    }

    for line in &lines {
        match *line {
            "NO DATA" => return Ok(None),
            "?" => return Err(ObdError::CommandRejected(request.to_string())),
            l if l.contains("UNABLE TO CONNECT") => return Err(ObdError::VehicleNotConnected),
            l if l.contains("ERROR") || l == "STOPPED" => {
                return Err(ObdError::InvalidResponse(l.to_string()))
            }
            _ => {}
        }
    }

    if protocol.is_legacy() {
        return join_legacy_messages(request, &lines).map(Some);
    }

    let segments: Vec<&str> = lines.iter().filter_map(|l| segment_payload(l)).collect();
    if segments.is_empty() {
        return parse_hex(lines[0]).map(Some);
    }

    let declared_len = lines
        .iter()
        .find(|l| l.len() == 3 && !l.contains(':'))
        .and_then(|l| usize::from_str_radix(l, 16).ok());

    let mut data = Vec::new();
    for segment in segments {
        data.extend(parse_hex(segment)?);
    }
    if let Some(len) = declared_len {
        data.truncate(len);
    }
    Ok(Some(data))
}

/// Merge one-message-per-line replies into a single frame
fn join_legacy_messages(request: &str, lines: &[&str]) -> Result<Vec<u8>, ObdError> {
    let request_bytes = parse_hex(request)?;
    let service = request_bytes.first().copied().unwrap_or_default();
    let reply_service = service.wrapping_add(0x40);
    let messages = lines
        .iter()
        .map(|line| parse_hex(line))
        .collect::<Result<Vec<_>, _>>()?;
    let invalid = || ObdError::InvalidResponse(format!("{request}: {}", lines.join(" | ")));

    match service {
        mode::READ_DTC | mode::PENDING_DTC | mode::PERMANENT_DTC => {
            // 43 A1 B1 A2 B2 A3 B3 per line, 00 00 pads
            let codes: Vec<u8> = messages
                .iter()
                .filter(|m| m.first() == Some(&reply_service))
                .flat_map(|m| m[1..].chunks_exact(2))
                .filter(|pair| pair[0] != 0 || pair[1] != 0)
                .flatten()
                .copied()
                .collect();
            if messages.iter().all(|m| m.first() != Some(&reply_service)) {
                return Err(invalid());
            }
            let count = u8::try_from(codes.len() / 2).unwrap_or(u8::MAX);
            let mut frame = vec![reply_service, count];
            frame.extend(codes);
            Ok(frame)
        }
        mode::VEHICLE_INFO => {
            // 49 <pid> <seq> D1 D2 D3 D4 per line
            let pid = request_bytes.get(1).copied().ok_or_else(invalid)?;
            let mut parts: Vec<&Vec<u8>> = messages
                .iter()
                .filter(|m| m.len() > 3 && m[0] == reply_service && m[1] == pid)
                .collect();
            if parts.is_empty() {
                return Err(invalid());
            }
            parts.sort_by_key(|m| m[2]);
            let mut frame = vec![reply_service, pid, 0x01];
            for part in parts {
                frame.extend_from_slice(&part[3..]);
            }
            Ok(frame)
        }
        // one message per controller; the first answer wins
        _ => messages.into_iter().next().ok_or_else(invalid),
    }
}

fn segment_payload(line: &str) -> Option<&str> {
    let (index, rest) = line.split_once(':')?;
    let index = index.trim();
    (index.len() == 1 && index.chars().all(|c| c.is_ascii_hexdigit())).then_some(rest)
}

fn parse_hex(text: &str) -> Result<Vec<u8>, ObdError> {
    let digits: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return Err(ObdError::InvalidResponse(text.to_string()));
    }
    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| ObdError::InvalidResponse(text.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Ecu;
    use crate::commands;
    use crate::decode;
    use std::collections::HashMap;
    use tokio::io::DuplexStream;

    const CAN: ObdProtocol = ObdProtocol::Iso15765_4Can11bit500;

    const ISO_VIN_REPLY: &str = "49 02 01 00 00 00 31\r49 02 02 46 54 46 57\r\
                                 49 02 03 31 45 54 35\r49 02 04 44 46 43 31\r\
                                 49 02 05 30 33 31 32";

    async fn fake_adapter(mut stream: DuplexStream, replies: HashMap<&'static str, &'static str>) {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match stream.read(&mut byte).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            if byte[0] != b'\r' {
                line.push(byte[0]);
                continue;
            }
            let command = String::from_utf8_lossy(&line).to_string();
            line.clear();
            let reply = replies
                .get(command.as_str())
                .copied()
                .unwrap_or(if command.starts_with("AT") { "OK" } else { "NO DATA" });
            if stream.write_all(format!("{reply}\r\r>").as_bytes()).await.is_err() {
                return;
            }
        }
    }

    fn vehicle_replies() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("ATZ", "ELM327 v1.5"),
            ("ATDPN", "A6"),
            ("0100", "4100BE1FA813"),
            ("0120", "412000020000"),
            ("012F", "412F80"),
            ("01A6", "41A60000000A"),
            ("0902", "014\r0: 490201314654\r1: 46573145543544\r2: 46433130333132"),
        ])
    }

    async fn connect_with(replies: HashMap<&'static str, &'static str>) -> Elm327Connection<DuplexStream> {
        let (client, adapter) = tokio::io::duplex(1024);
        tokio::spawn(fake_adapter(adapter, replies));
        Elm327Connection::initialize(client, Elm327Config::default())
            .await
            .unwrap()
    }

    async fn connect() -> Elm327Connection<DuplexStream> {
        connect_with(vehicle_replies()).await
    }

    #[test]
    fn test_parse_single_frame() {
        assert_eq!(
            parse_response("012F", "41 2F 80\r\r", CAN).unwrap(),
            Some(vec![0x41, 0x2F, 0x80])
        );
        assert_eq!(
            parse_response("012F", "SEARCHING...\r412F80", CAN).unwrap(),
            Some(vec![0x41, 0x2F, 0x80])
        );
    }

    #[test]
    fn test_parse_no_data_and_errors() {
        assert_eq!(parse_response("01A6", "NO DATA\r", CAN).unwrap(), None);
        assert!(matches!(
            parse_response("01A6", "?", CAN),
            Err(ObdError::CommandRejected(_))
        ));
        assert!(matches!(
            parse_response("0100", "SEARCHING...\rUNABLE TO CONNECT", CAN),
            Err(ObdError::VehicleNotConnected)
        ));
        assert!(matches!(
            parse_response("0100", "CAN ERROR", CAN),
            Err(ObdError::InvalidResponse(_))
        ));
        assert!(parse_response("0100", "41 0", CAN).is_err());
        assert!(parse_response("0100", "", CAN).is_err());
    }

    #[test]
    fn test_parse_multi_frame_vin() {
        let raw = "014\r0: 490201314654\r1: 46573145543544\r2: 46433130333132";
        let frame = parse_response("0902", raw, CAN).unwrap().unwrap();
        assert_eq!(frame.len(), 20);
        assert_eq!(
            commands::vin().decode(&frame),
            Some(crate::PhysicalValue::Text("1FTFW1ET5DFC10312".to_string()))
        );
    }

    #[test]
    fn test_parse_iso9141_trouble_codes() {
        let frame = parse_response("03", "43 01 33 02 44 03 55", ObdProtocol::Iso9141_2)
            .unwrap()
            .unwrap();
        assert_eq!(frame, vec![0x43, 0x03, 0x01, 0x33, 0x02, 0x44, 0x03, 0x55]);
        assert_eq!(
            commands::get_dtc().decode(&frame),
            Some(crate::PhysicalValue::Codes(vec![
                "P0133".to_string(),
                "P0244".to_string(),
                "P0355".to_string()
            ]))
        );
    }

    #[test]
    fn test_parse_j1850_trouble_codes_from_two_messages() {
        // four codes across two messages, second one padded
        let raw = "43 01 33 02 44 03 55\r43 C1 23 00 00 00 00";
        let frame = parse_response("03", raw, ObdProtocol::J1850Pwm).unwrap().unwrap();
        let codes = commands::get_dtc().decode(&frame);
        assert_eq!(
            codes,
            Some(crate::PhysicalValue::Codes(vec![
                "P0133".to_string(),
                "P0244".to_string(),
                "P0355".to_string(),
                "U0123".to_string()
            ]))
        );

        // no stored codes
        let frame = parse_response("03", "43 00 00 00 00 00 00", ObdProtocol::J1850Vpw)
            .unwrap()
            .unwrap();
        assert_eq!(frame, vec![0x43, 0x00]);
        assert_eq!(
            commands::get_dtc().decode(&frame),
            Some(crate::PhysicalValue::Codes(vec![]))
        );
    }

    #[test]
    fn test_parse_iso9141_vin() {
        let frame = parse_response("0902", ISO_VIN_REPLY, ObdProtocol::Iso9141_2)
            .unwrap()
            .unwrap();
        assert_eq!(&frame[..3], &[0x49, 0x02, 0x01]);
        assert_eq!(
            commands::vin().decode(&frame),
            Some(crate::PhysicalValue::Text("1FTFW1ET5DFC10312".to_string()))
        );
    }

    #[test]
    fn test_parse_legacy_vin_out_of_order() {
        let raw = "49 02 02 46 54 46 57\r49 02 01 00 00 00 31\r49 02 03 31 45 54 35\r\
                   49 02 05 30 33 31 32\r49 02 04 44 46 43 31";
        let frame = parse_response("0902", raw, ObdProtocol::Iso14230_4KwpFast)
            .unwrap()
            .unwrap();
        assert_eq!(
            commands::vin().decode(&frame),
            Some(crate::PhysicalValue::Text("1FTFW1ET5DFC10312".to_string()))
        );
    }

    #[test]
    fn test_parse_legacy_mismatched_reply() {
        assert!(matches!(
            parse_response("03", "41 0C 1A F8", ObdProtocol::Iso9141_2),
            Err(ObdError::InvalidResponse(_))
        ));
        // current data keeps the first controller's answer
        assert_eq!(
            parse_response("012F", "41 2F 80\r41 2F 7F", ObdProtocol::Iso9141_2).unwrap(),
            Some(vec![0x41, 0x2F, 0x80])
        );
    }

    #[test]
    fn test_decode_pid_bitmask() {
        let pids = decode_pid_bitmask(0x00, &[0x41, 0x00, 0xBE, 0x1F, 0xA8, 0x13]);
        assert!(pids.contains(&0x01));
        assert!(pids.contains(&0x0C));
        assert!(pids.contains(&0x20));
        assert!(!pids.contains(&0x0A));
        // base mismatch
        assert!(decode_pid_bitmask(0x20, &[0x41, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]).is_empty());
        // top range never overflows
        assert_eq!(decode_pid_bitmask(0xE0, &[0x41, 0xE0, 0xFF, 0xFF, 0xFF, 0xFF]).len(), 31);
    }

    #[tokio::test]
    async fn test_initialize_and_query() {
        let mut conn = connect().await;
        assert_eq!(conn.protocol(), ObdProtocol::Iso15765_4Can11bit500);

        let response = conn.query(&commands::mileage()).await.unwrap().unwrap();
        assert_eq!(response.command, "MILEAGE");
        assert_eq!(
            commands::mileage().decode(&response.data).and_then(|v| v.as_f64()),
            Some(0.62)
        );
        assert!(conn.query(&commands::get_dtc()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_iso9141_vehicle_vin_and_codes() {
        let mut replies = vehicle_replies();
        replies.insert("ATDPN", "A3");
        replies.insert("0902", ISO_VIN_REPLY);
        replies.insert("03", "43 01 33 02 44 03 55");
        let mut conn = connect_with(replies).await;
        assert_eq!(conn.protocol(), ObdProtocol::Iso9141_2);

        let vin = conn.query(&commands::vin()).await.unwrap().unwrap();
        assert_eq!(
            commands::vin().decode(&vin.data),
            Some(crate::PhysicalValue::Text("1FTFW1ET5DFC10312".to_string()))
        );
        let codes = conn.query(&commands::get_dtc()).await.unwrap().unwrap();
        assert_eq!(
            commands::get_dtc().decode(&codes.data).and_then(|v| v.as_f64()),
            Some(3.0)
        );
    }

    #[tokio::test]
    async fn test_supported_commands() {
        let mut conn = connect().await;
        let mut registry = CommandRegistry::with_builtin();
        registry
            .register(DiagnosticCommand::new(
                "FUEL_PRESSURE",
                "Fuel pressure",
                &[0x01, 0x0A],
                3,
                decode::uint,
                Ecu::Engine,
            ))
            .unwrap();

        let supported = conn.supported_commands(&registry).await.unwrap();
        assert!(supported.contains("FUEL_LEVEL"));
        assert!(supported.contains("MILEAGE"));
        assert!(supported.contains("VIN"));
        assert!(!supported.contains("FUEL_PRESSURE"));
    }

    #[tokio::test]
    async fn test_watch_loop_and_stop() {
        let mut conn = connect().await;
        conn.watch(commands::fuel_level()).unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        conn.start(tx).unwrap();

        let response = rx.recv().await.unwrap();
        assert_eq!(response.data, vec![0x41, 0x2F, 0x80]);

        conn.stop().await;
        assert!(!conn.is_connected());
        conn.stop().await;
        assert!(conn.query(&commands::fuel_level()).await.is_err());
    }

    #[tokio::test]
    async fn test_normalize_vin_quirk() {
        let conn = connect().await;
        assert_eq!(conn.normalize_vin("FTFW1ET5DFC10312".into()), "1FTFW1ET5DFC10312");
        assert_eq!(conn.normalize_vin("1FTFW1ET5DFC10312".into()), "1FTFW1ET5DFC10312");
    }
}

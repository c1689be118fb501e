//! Simulator producer
//!
//! Polls a simulator (or bridge) HTTP endpoint once per tick. The response is
//! a JSON object carrying either raw `mavlink_messages` records or a
//! `telemetry` object in SI units, which is converted back into protocol
//! messages so that everything downstream goes through the one decoder.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::{Producer, ProducerError};
use crate::mavlink::modes::{copter_mode_number, MAV_AUTOPILOT_ARDUPILOTMEGA, MAV_TYPE_QUADROTOR};
use crate::mavlink::*;
use crate::vehicle_state::DataOrigin;

/// Response bodies beyond this are rejected
const MAX_RESPONSE_BYTES: usize = 1 << 20;

const DISARMED: &str = "DISARMED";
/// Generic MAV_TYPE: mode names outside the copter table render as MODE_<n>
const MAV_TYPE_GENERIC: u8 = 0;

/// `http://host[:port][/path]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorUrl {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl SimulatorUrl {
    pub fn parse(url: &str) -> Result<Self, ProducerError> {
        let rest = url
            .trim()
            .strip_prefix("http://")
            .ok_or_else(|| ProducerError::Protocol(format!("unsupported URL {:?}", url)))?;

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };

        let bad_port = || ProducerError::Protocol(format!("bad port in {:?}", url));
        // IPv6 literals are bracketed: [::1]:5000
        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, rest) = bracketed
                .split_once(']')
                .ok_or_else(|| ProducerError::Protocol(format!("unclosed IPv6 host in {:?}", url)))?;
            match rest {
                "" => (host, 80),
                _ => {
                    let port = rest.strip_prefix(':').ok_or_else(bad_port)?;
                    (host, port.parse().map_err(|_| bad_port())?)
                }
            }
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, port.parse().map_err(|_| bad_port())?),
                None => (authority, 80),
            }
        };

        if host.is_empty() {
            return Err(ProducerError::Protocol(format!("missing host in {:?}", url)));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// Value for the Host request header
    fn host_header(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Request/response simulator client
pub struct SimulatorProducer {
    url: SimulatorUrl,
    rejected_records: u64,
}

impl SimulatorProducer {
    pub fn new(url: &str) -> Result<Self, ProducerError> {
        Ok(Self {
            url: SimulatorUrl::parse(url)?,
            rejected_records: 0,
        })
    }

    async fn get(&self) -> Result<Vec<u8>, ProducerError> {
        let mut stream = TcpStream::connect((self.url.host.as_str(), self.url.port)).await?;

        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nAccept: application/json\r\nConnection: close\r\n\r\n",
            self.url.path,
            self.url.host_header()
        );
        stream.write_all(request.as_bytes()).await?;

        // Stop as soon as the body is complete; servers may keep the socket open
        let mut raw = Vec::with_capacity(4096);
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return parse_http_response(&raw);
            }
            raw.extend_from_slice(&chunk[..n]);
            if raw.len() > MAX_RESPONSE_BYTES {
                return Err(ProducerError::Protocol("response too large".into()));
            }
            if let Some(body) = complete_body(&raw, false)? {
                return Ok(body);
            }
        }
    }
}

#[async_trait]
impl Producer for SimulatorProducer {
    fn name(&self) -> &str {
        "Simulator"
    }

    fn origin(&self) -> DataOrigin {
        DataOrigin::Simulator
    }

    async fn fetch(&mut self) -> Result<Vec<RawProtocolMessage>, ProducerError> {
        let body = self.get().await?;
        let (messages, rejected) = messages_from_response(&body)?;
        if rejected > 0 {
            self.rejected_records += rejected;
            debug!(
                "[Simulator] Dropped {} records ({} total)",
                rejected, self.rejected_records
            );
        }
        Ok(messages)
    }
}

/// How the end of a response body is found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    Length(usize),
    Chunked,
    UntilClose,
}

struct ResponseHead {
    status: u16,
    framing: BodyFraming,
    body_start: usize,
}

fn truncated_response() -> ProducerError {
    ProducerError::Protocol("truncated HTTP response".into())
}

/// Parse the status line and framing headers. `None` until the blank line
/// ending the head has arrived.
fn parse_head(raw: &[u8]) -> Result<Option<ResponseHead>, ProducerError> {
    let Some(split) = raw.windows(4).position(|w| w == b"\r\n\r\n") else {
        return Ok(None);
    };

    let head = std::str::from_utf8(&raw[..split])
        .map_err(|_| ProducerError::Protocol("non-UTF-8 response head".into()))?;

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ProducerError::Protocol(format!("bad status line {:?}", status_line)))?;

    let mut framing = BodyFraming::UntilClose;
    for (name, value) in lines.filter_map(|line| line.split_once(':')) {
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("transfer-encoding") && value.eq_ignore_ascii_case("chunked") {
            framing = BodyFraming::Chunked;
        } else if name.eq_ignore_ascii_case("content-length") && framing != BodyFraming::Chunked {
            let length = value
                .parse()
                .map_err(|_| ProducerError::Protocol(format!("bad Content-Length {:?}", value)))?;
            framing = BodyFraming::Length(length);
        }
    }

    Ok(Some(ResponseHead {
        status,
        framing,
        body_start: split + 4,
    }))
}

/// Body of `raw` once it is complete, `None` while more bytes are needed.
/// With `eof` set the connection has ended and an incomplete body is an error.
fn complete_body(raw: &[u8], eof: bool) -> Result<Option<Vec<u8>>, ProducerError> {
    let Some(head) = parse_head(raw)? else {
        return if eof { Err(truncated_response()) } else { Ok(None) };
    };

    if !(200..300).contains(&head.status) {
        return Err(ProducerError::Protocol(format!("HTTP status {}", head.status)));
    }

    let body = &raw[head.body_start..];
    let complete = match head.framing {
        BodyFraming::Length(length) => body.get(..length).map(<[u8]>::to_vec),
        BodyFraming::Chunked => decode_chunked(body)?,
        BodyFraming::UntilClose => eof.then(|| body.to_vec()),
    };

    match complete {
        None if eof => Err(truncated_response()),
        complete => Ok(complete),
    }
}

/// Split a fully received HTTP/1.x response and return its body.
///
/// Non-2xx statuses are protocol errors. Content-Length and chunked transfer
/// encoding are honoured.
pub fn parse_http_response(raw: &[u8]) -> Result<Vec<u8>, ProducerError> {
    complete_body(raw, true)?.ok_or_else(truncated_response)
}

/// Decode a chunked body. `None` while the terminating chunk is missing.
fn decode_chunked(mut body: &[u8]) -> Result<Option<Vec<u8>>, ProducerError> {
    let mut out = Vec::with_capacity(body.len());

    loop {
        let Some(line_end) = body.windows(2).position(|w| w == b"\r\n") else {
            return Ok(None);
        };
        let size_line = std::str::from_utf8(&body[..line_end])
            .map_err(|_| ProducerError::Protocol("non-UTF-8 chunk size".into()))?;
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .ok()
            .filter(|size| *size <= MAX_RESPONSE_BYTES)
            .ok_or_else(|| ProducerError::Protocol(format!("bad chunk size {:?}", size_hex)))?;

        body = &body[line_end + 2..];
        if size == 0 {
            return Ok(Some(out));
        }

        let Some(data_end) = size.checked_add(2).filter(|end| *end <= body.len()) else {
            return Ok(None);
        };
        if &body[size..data_end] != b"\r\n" {
            return Err(ProducerError::Protocol("chunk not terminated by CRLF".into()));
        }
        out.extend_from_slice(&body[..size]);
        body = &body[data_end..];
    }
}

/// Convert a simulator response body into protocol messages.
///
/// Returns the messages and the number of `mavlink_messages` records that
/// were dropped at ingress.
pub fn messages_from_response(
    body: &[u8],
) -> Result<(Vec<RawProtocolMessage>, u64), ProducerError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ProducerError::Protocol(format!("invalid JSON body: {}", e)))?;
    let obj = value
        .as_object()
        .ok_or_else(|| ProducerError::Protocol("response is not a JSON object".into()))?;

    if obj.get("success").and_then(Value::as_bool) == Some(false) {
        let reason = obj
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("no reason given");
        return Err(ProducerError::Protocol(format!("simulator reported failure: {}", reason)));
    }

    if let Some(records) = obj
        .get("mavlink_messages")
        .and_then(Value::as_array)
        .filter(|records| !records.is_empty())
    {
        let mut messages = Vec::with_capacity(records.len());
        let mut rejected = 0;
        for record in records {
            match parse_record(record) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    rejected += 1;
                    debug!("[Simulator] Rejected record: {}", e);
                }
            }
        }
        return Ok((messages, rejected));
    }

    match obj.get("telemetry").and_then(Value::as_object) {
        Some(telemetry) => Ok((telemetry_messages(telemetry), 0)),
        None => Err(ProducerError::Protocol(
            "response has neither mavlink_messages nor telemetry".into(),
        )),
    }
}

/// Re-encode an SI telemetry object as protocol messages
fn telemetry_messages(t: &Map<String, Value>) -> Vec<RawProtocolMessage> {
    let num = |key: &str| t.get(key).and_then(Value::as_f64).filter(|v| v.is_finite());
    let mut messages = Vec::with_capacity(4);

    if let Some(heartbeat) = t.get("heartbeat").and_then(Value::as_bool) {
        let mode = t.get("flightMode").and_then(Value::as_str).unwrap_or(DISARMED);
        let (armed, custom_mode, mav_type) = if mode.eq_ignore_ascii_case(DISARMED) {
            (false, 0, MAV_TYPE_QUADROTOR)
        } else {
            match copter_mode_number(mode) {
                Some(n) => (true, n, MAV_TYPE_QUADROTOR),
                None => {
                    debug!("[Simulator] Unknown flight mode {:?}", mode);
                    (true, 0, MAV_TYPE_GENERIC)
                }
            }
        };

        let mut base_mode = MAV_MODE_FLAG_CUSTOM_MODE_ENABLED;
        if armed {
            base_mode |= MAV_MODE_FLAG_SAFETY_ARMED;
        }

        messages.push(RawProtocolMessage::Heartbeat(Heartbeat {
            mav_type,
            autopilot: MAV_AUTOPILOT_ARDUPILOTMEGA,
            base_mode,
            custom_mode,
            system_status: if heartbeat { MAV_STATE_ACTIVE } else { MAV_STATE_BOOT },
        }));
    }

    if let (Some(lat), Some(lon)) = (num("latitude"), num("longitude")) {
        let alt = num("altitude").unwrap_or(0.0);
        let speed = num("speed").unwrap_or(0.0);
        messages.push(RawProtocolMessage::GlobalPosition(GlobalPosition {
            lat: (lat * 1e7).round() as i32,
            lon: (lon * 1e7).round() as i32,
            alt: (alt * 1000.0).round() as i32,
            vx: (speed * 100.0).round() as i16,
            ..Default::default()
        }));
    }

    if ["roll", "pitch", "yaw"].iter().any(|k| num(k).is_some()) {
        messages.push(RawProtocolMessage::Attitude(Attitude {
            roll: num("roll").unwrap_or(0.0) as f32,
            pitch: num("pitch").unwrap_or(0.0) as f32,
            yaw: num("yaw").unwrap_or(0.0) as f32,
            ..Default::default()
        }));
    }

    if let Some(battery) = num("battery") {
        messages.push(RawProtocolMessage::SystemStatus(SystemStatus {
            battery_remaining: battery.round().clamp(-1.0, 100.0) as i8,
            ..Default::default()
        }));
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink::parser::decode_batch;
    use std::time::Duration;
    use tokio::net::TcpListener;

    const SIM_BODY: &str = r#"{
        "success": true,
        "timestamp": 1700000000000,
        "is_connected": true,
        "telemetry": {
            "altitude": 120.5, "speed": 6.0,
            "latitude": 34.0522, "longitude": -118.2437,
            "battery": 87.4,
            "roll": 0.1, "pitch": -0.05, "yaw": 1.5,
            "heartbeat": true, "flightMode": "GUIDED"
        }
    }"#;

    #[test]
    fn test_url_parsing() {
        let url = SimulatorUrl::parse("http://127.0.0.1:5000/").unwrap();
        assert_eq!((url.host.as_str(), url.port, url.path.as_str()), ("127.0.0.1", 5000, "/"));

        let url = SimulatorUrl::parse("http://sim.local/api/telemetry").unwrap();
        assert_eq!(url.port, 80);
        assert_eq!(url.path, "/api/telemetry");

        assert!(SimulatorUrl::parse("https://sim.local/").is_err());
        assert!(SimulatorUrl::parse("http://:5000/").is_err());
        assert!(SimulatorUrl::parse("http://host:port/").is_err());

        let url = SimulatorUrl::parse("http://[::1]:5000/telemetry").unwrap();
        assert_eq!((url.host.as_str(), url.port), ("::1", 5000));
        assert_eq!(url.host_header(), "[::1]:5000");
        assert_eq!(SimulatorUrl::parse("http://[fe80::1]/").unwrap().port, 80);
        assert!(SimulatorUrl::parse("http://[::1/").is_err());
        assert!(SimulatorUrl::parse("http://[::1]5000/").is_err());
    }

    #[test]
    fn test_http_response_plain_and_chunked() {
        let plain = b"HTTP/1.0 200 OK\r\nContent-Type: application/json\r\n\r\n{\"a\":1}";
        assert_eq!(parse_http_response(plain).unwrap(), b"{\"a\":1}");

        let chunked =
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\n{\"a\"\r\n3\r\n:1}\r\n0\r\n\r\n";
        assert_eq!(parse_http_response(chunked).unwrap(), b"{\"a\":1}");

        let error = b"HTTP/1.1 503 Service Unavailable\r\n\r\n";
        assert!(matches!(parse_http_response(error), Err(ProducerError::Protocol(_))));
        assert!(parse_http_response(b"HTTP/1.1 200 OK\r\n").is_err());
    }

    #[test]
    fn test_content_length_bounds_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\n\r\n{\"a\":1}trailing";
        assert_eq!(parse_http_response(raw).unwrap(), b"{\"a\":1}");

        let short = b"HTTP/1.1 200 OK\r\nContent-Length: 70\r\n\r\n{\"a\":1}";
        assert!(complete_body(short, false).unwrap().is_none());
        assert!(matches!(parse_http_response(short), Err(ProducerError::Protocol(_))));

        let bad = b"HTTP/1.1 200 OK\r\nContent-Length: lots\r\n\r\n";
        assert!(matches!(parse_http_response(bad), Err(ProducerError::Protocol(_))));
    }

    #[test]
    fn test_bad_chunk_sizes_rejected() {
        let huge = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\n{}\r\n0\r\n\r\n";
        assert!(matches!(parse_http_response(huge), Err(ProducerError::Protocol(_))));
        assert!(matches!(complete_body(huge, false), Err(ProducerError::Protocol(_))));

        let unterminated = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\n{}xx0\r\n\r\n";
        assert!(matches!(parse_http_response(unterminated), Err(ProducerError::Protocol(_))));

        // Partial chunk: wait for more bytes, fail only at EOF
        let partial = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n10\r\n{\"a\"";
        assert!(complete_body(partial, false).unwrap().is_none());
        assert!(parse_http_response(partial).is_err());
    }

    #[test]
    fn test_telemetry_object_conversion() {
        let (messages, rejected) = messages_from_response(SIM_BODY.as_bytes()).unwrap();
        assert_eq!(rejected, 0);

        let patch = decode_batch(&messages);
        assert!((patch.latitude.unwrap() - 34.0522).abs() < 1e-7);
        assert!((patch.longitude.unwrap() + 118.2437).abs() < 1e-7);
        assert_eq!(patch.altitude, Some(120.5));
        assert_eq!(patch.ground_speed, Some(6.0));
        assert_eq!(patch.battery_percent, Some(87.0));
        assert_eq!(patch.flight_mode.as_deref(), Some("GUIDED"));
        assert_eq!(patch.armed, Some(true));
        assert_eq!(patch.heartbeat_ok, Some(true));
        assert!((patch.yaw.unwrap() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_disarmed_idle_simulator() {
        let body = r#"{"success": true, "telemetry": {"heartbeat": false, "flightMode": "DISARMED", "battery": 100}}"#;
        let (messages, _) = messages_from_response(body.as_bytes()).unwrap();
        let patch = decode_batch(&messages);

        assert_eq!(patch.armed, Some(false));
        assert_eq!(patch.flight_mode.as_deref(), Some("STABILIZE"));
        assert_eq!(patch.heartbeat_ok, Some(false));
        // No coordinates reported: position untouched
        assert_eq!(patch.latitude, None);
    }

    #[test]
    fn test_raw_records_preferred() {
        let body = r#"{
            "success": true,
            "mavlink_messages": [
                {"mavpackettype": "HEARTBEAT", "type": 2, "autopilot": 3, "base_mode": 129, "custom_mode": 6, "system_status": 4},
                {"mavpackettype": "NOT_A_MESSAGE"},
                {"msgid": 147, "battery_remaining": 55}
            ],
            "telemetry": {"battery": 10}
        }"#;
        let (messages, rejected) = messages_from_response(body.as_bytes()).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(rejected, 1);

        let patch = decode_batch(&messages);
        assert_eq!(patch.flight_mode.as_deref(), Some("RTL"));
        assert_eq!(patch.battery_percent, Some(55.0));
    }

    #[test]
    fn test_failure_responses() {
        let failed = br#"{"success": false, "error": "sim not running"}"#;
        assert!(matches!(messages_from_response(failed), Err(ProducerError::Protocol(_))));

        let empty = br#"{"success": true}"#;
        assert!(matches!(messages_from_response(empty), Err(ProducerError::Protocol(_))));

        assert!(messages_from_response(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_fetch_from_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let n = socket.read(&mut request).await.unwrap();
            assert!(request[..n].starts_with(b"GET /telemetry HTTP/1.1\r\n"));

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                SIM_BODY.len(),
                SIM_BODY
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let mut producer = SimulatorProducer::new(&format!("http://{}/telemetry", addr)).unwrap();
        let messages = producer.fetch().await.unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(producer.origin(), DataOrigin::Simulator);
    }

    #[tokio::test]
    async fn test_fetch_completes_while_server_keeps_socket_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            socket.read(&mut request).await.unwrap();

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                SIM_BODY.len(),
                SIM_BODY
            );
            socket.write_all(response.as_bytes()).await.unwrap();

            let (mut socket, _) = listener.accept().await.unwrap();
            socket.read(&mut request).await.unwrap();
            let mut chunked = String::from("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n");
            for part in [&SIM_BODY[..40], &SIM_BODY[40..]] {
                chunked.push_str(&format!("{:x}\r\n{}\r\n", part.len(), part));
            }
            chunked.push_str("0\r\n\r\n");
            socket.write_all(chunked.as_bytes()).await.unwrap();

            // Hold both connections open until the client is done
            let _ = done_rx.await;
        });

        let mut producer = SimulatorProducer::new(&format!("http://{}/telemetry", addr)).unwrap();
        for _ in 0..2 {
            let messages = tokio::time::timeout(Duration::from_millis(500), producer.fetch())
                .await
                .expect("fetch should finish without waiting for EOF")
                .unwrap();
            assert_eq!(messages.len(), 4);
        }
        let _ = done_tx.send(());
    }

    #[tokio::test]
    async fn test_unreachable_simulator_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut producer = SimulatorProducer::new(&format!("http://{}/", addr)).unwrap();
        assert!(matches!(producer.fetch().await, Err(ProducerError::Io(_))));
    }
}

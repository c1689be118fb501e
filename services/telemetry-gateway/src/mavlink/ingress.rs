//! JSON record ingress
//!
//! Bridges and simulators emit MAVLink messages as JSON objects, tagged either
//! by a symbolic `type`/`mavpackettype` name or by a numeric `msgid`. Records
//! are resolved to a [`RawProtocolMessage`] exactly once, here.

use serde_json::{Map, Value};

use super::types::*;

/// Ingress error types
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record carries no message kind")]
    MissingKind,
    #[error("unsupported message kind {0}")]
    UnknownKind(String),
    #[error("msgid {msgid} disagrees with type {name}")]
    ConflictingKind { msgid: u64, name: String },
}

/// Parse one line of newline-delimited JSON
pub fn parse_line(line: &str) -> Result<RawProtocolMessage, IngressError> {
    let value: Value = serde_json::from_str(line.trim())?;
    parse_record(&value)
}

/// Resolve one JSON record into a typed message
pub fn parse_record(value: &Value) -> Result<RawProtocolMessage, IngressError> {
    let obj = value.as_object().ok_or(IngressError::NotAnObject)?;
    let kind = resolve_kind(obj)?;

    let msg = match kind {
        MessageKind::Heartbeat => RawProtocolMessage::Heartbeat(Heartbeat {
            // `type` is MAV_TYPE only when numeric; a string `type` is the tag
            mav_type: if obj.get("type").map_or(false, Value::is_number) {
                int(obj, "type")
            } else {
                int(obj, "mav_type")
            },
            autopilot: int(obj, "autopilot"),
            base_mode: int(obj, "base_mode"),
            custom_mode: int(obj, "custom_mode"),
            system_status: int(obj, "system_status"),
        }),
        MessageKind::SystemStatus => RawProtocolMessage::SystemStatus(SystemStatus {
            voltage_battery: int(obj, "voltage_battery"),
            current_battery: int(obj, "current_battery"),
            battery_remaining: int_or(obj, "battery_remaining", -1),
            load: int(obj, "load"),
            drop_rate_comm: int(obj, "drop_rate_comm"),
        }),
        MessageKind::GpsRawInt => RawProtocolMessage::GpsRawInt(GpsRawInt {
            lat: int(obj, "lat"),
            lon: int(obj, "lon"),
            alt: int(obj, "alt"),
            eph: int(obj, "eph"),
            epv: int(obj, "epv"),
            vel: int(obj, "vel"),
            cog: int(obj, "cog"),
            fix_type: int(obj, "fix_type"),
            satellites_visible: int(obj, "satellites_visible"),
        }),
        MessageKind::Attitude => RawProtocolMessage::Attitude(Attitude {
            roll: float(obj, "roll"),
            pitch: float(obj, "pitch"),
            yaw: float(obj, "yaw"),
            rollspeed: float(obj, "rollspeed"),
            pitchspeed: float(obj, "pitchspeed"),
            yawspeed: float(obj, "yawspeed"),
        }),
        MessageKind::GlobalPosition => RawProtocolMessage::GlobalPosition(GlobalPosition {
            lat: int(obj, "lat"),
            lon: int(obj, "lon"),
            alt: int(obj, "alt"),
            relative_alt: int(obj, "relative_alt"),
            vx: int(obj, "vx"),
            vy: int(obj, "vy"),
            vz: int(obj, "vz"),
            hdg: int(obj, "hdg"),
        }),
        MessageKind::VfrHud => RawProtocolMessage::VfrHud(VfrHud {
            airspeed: float(obj, "airspeed"),
            groundspeed: float(obj, "groundspeed"),
            heading: int(obj, "heading"),
            throttle: int(obj, "throttle"),
            alt: float(obj, "alt"),
            climb: float(obj, "climb"),
        }),
        MessageKind::BatteryStatus => RawProtocolMessage::BatteryStatus(BatteryStatus {
            id: int(obj, "id"),
            current_battery: int(obj, "current_battery"),
            battery_remaining: int_or(obj, "battery_remaining", -1),
        }),
    };

    Ok(msg)
}

fn resolve_kind(obj: &Map<String, Value>) -> Result<MessageKind, IngressError> {
    let name = obj
        .get("mavpackettype")
        .and_then(Value::as_str)
        .or_else(|| obj.get("type").and_then(Value::as_str));
    let msgid = obj.get("msgid").and_then(Value::as_u64);

    match (msgid, name) {
        (Some(id), Some(name)) => {
            let by_id = MessageKind::from_msgid(id);
            let by_name = MessageKind::from_name(name);
            match (by_id, by_name) {
                (Some(a), Some(b)) if a == b => Ok(a),
                (None, None) => Err(IngressError::UnknownKind(name.to_string())),
                _ => Err(IngressError::ConflictingKind {
                    msgid: id,
                    name: name.to_string(),
                }),
            }
        }
        (Some(id), None) => {
            MessageKind::from_msgid(id).ok_or_else(|| IngressError::UnknownKind(id.to_string()))
        }
        (None, Some(name)) => {
            MessageKind::from_name(name).ok_or_else(|| IngressError::UnknownKind(name.to_string()))
        }
        (None, None) => Err(IngressError::MissingKind),
    }
}

/// Integer field; missing, mistyped or out-of-range values read as zero
fn int<T>(obj: &Map<String, Value>, key: &str) -> T
where
    T: TryFrom<i64> + Default,
{
    int_or(obj, key, T::default())
}

fn int_or<T>(obj: &Map<String, Value>, key: &str, fallback: T) -> T
where
    T: TryFrom<i64>,
{
    let raw = match obj.get(key) {
        Some(v) => v
            .as_i64()
            .or_else(|| v.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
        None => None,
    };
    raw.and_then(|v| T::try_from(v).ok()).unwrap_or(fallback)
}

/// Float field; missing or mistyped values read as zero
fn float(obj: &Map<String, Value>, key: &str) -> f32 {
    obj.get(key).and_then(Value::as_f64).unwrap_or(0.0) as f32
}

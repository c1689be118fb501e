//! MAVLink message records
//!
//! Frames are assumed to be already synced and CRC-checked upstream; these are
//! the field-level records in protocol-native units.

/// MAV_STATE values the decoder cares about
pub const MAV_STATE_UNINIT: u8 = 0;
pub const MAV_STATE_BOOT: u8 = 1;
pub const MAV_STATE_ACTIVE: u8 = 4;

/// MAV_MODE_FLAG_SAFETY_ARMED
pub const MAV_MODE_FLAG_SAFETY_ARMED: u8 = 0x80;
/// MAV_MODE_FLAG_CUSTOM_MODE_ENABLED
pub const MAV_MODE_FLAG_CUSTOM_MODE_ENABLED: u8 = 0x01;

/// Message identifiers for the kinds this service consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
    Heartbeat = 0,
    SystemStatus = 1,
    GpsRawInt = 24,
    Attitude = 30,
    GlobalPosition = 33,
    VfrHud = 74,
    BatteryStatus = 147,
}

impl MessageKind {
    pub fn from_msgid(msgid: u64) -> Option<Self> {
        match msgid {
            0 => Some(Self::Heartbeat),
            1 => Some(Self::SystemStatus),
            24 => Some(Self::GpsRawInt),
            30 => Some(Self::Attitude),
            33 => Some(Self::GlobalPosition),
            74 => Some(Self::VfrHud),
            147 => Some(Self::BatteryStatus),
            _ => None,
        }
    }

    /// Resolve a symbolic message name. Accepts both the common.xml name
    /// (`SYS_STATUS`) and the spelling some simulators emit (`SYSTEM_STATUS`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "HEARTBEAT" => Some(Self::Heartbeat),
            "SYS_STATUS" | "SYSTEM_STATUS" => Some(Self::SystemStatus),
            "GPS_RAW_INT" => Some(Self::GpsRawInt),
            "ATTITUDE" => Some(Self::Attitude),
            "GLOBAL_POSITION_INT" => Some(Self::GlobalPosition),
            "VFR_HUD" => Some(Self::VfrHud),
            "BATTERY_STATUS" => Some(Self::BatteryStatus),
            _ => None,
        }
    }
}

/// HEARTBEAT (#0)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Heartbeat {
    /// MAV_TYPE (1 = fixed wing, 2 = quadrotor, ...)
    pub mav_type: u8,
    /// MAV_AUTOPILOT (3 = ArduPilot, 12 = PX4)
    pub autopilot: u8,
    /// MAV_MODE_FLAG bitfield
    pub base_mode: u8,
    /// Autopilot-specific flight mode number
    pub custom_mode: u32,
    /// MAV_STATE
    pub system_status: u8,
}

/// SYS_STATUS (#1)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemStatus {
    /// Battery voltage in mV
    pub voltage_battery: u16,
    /// Battery current in cA, -1 if unknown
    pub current_battery: i16,
    /// Remaining battery 0-100, -1 if unknown
    pub battery_remaining: i8,
    /// CPU load in 0.1 percent
    pub load: u16,
    pub drop_rate_comm: u16,
}

/// GPS_RAW_INT (#24)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpsRawInt {
    /// Latitude in degE7
    pub lat: i32,
    /// Longitude in degE7
    pub lon: i32,
    /// Altitude (MSL) in mm
    pub alt: i32,
    pub eph: u16,
    pub epv: u16,
    /// Ground speed in cm/s, u16::MAX if unknown
    pub vel: u16,
    /// Course over ground in cdeg
    pub cog: u16,
    /// GPS_FIX_TYPE
    pub fix_type: u8,
    /// 255 if unknown
    pub satellites_visible: u8,
}

/// ATTITUDE (#30)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Attitude {
    /// Radians
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    /// Radians per second
    pub rollspeed: f32,
    pub pitchspeed: f32,
    pub yawspeed: f32,
}

/// GLOBAL_POSITION_INT (#33)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlobalPosition {
    /// Latitude in degE7
    pub lat: i32,
    /// Longitude in degE7
    pub lon: i32,
    /// Altitude (MSL) in mm
    pub alt: i32,
    /// Altitude above home in mm
    pub relative_alt: i32,
    /// Ground X speed (north) in cm/s
    pub vx: i16,
    /// Ground Y speed (east) in cm/s
    pub vy: i16,
    /// Ground Z speed (down) in cm/s
    pub vz: i16,
    /// Heading in cdeg, u16::MAX if unknown
    pub hdg: u16,
}

/// VFR_HUD (#74)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VfrHud {
    /// m/s
    pub airspeed: f32,
    /// m/s
    pub groundspeed: f32,
    /// Degrees 0-360
    pub heading: i16,
    /// Percent 0-100
    pub throttle: u16,
    /// Altitude (MSL) in m
    pub alt: f32,
    /// Climb rate in m/s
    pub climb: f32,
}

/// BATTERY_STATUS (#147)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatteryStatus {
    pub id: u8,
    /// Battery current in cA, -1 if unknown
    pub current_battery: i16,
    /// Remaining battery 0-100, -1 if unknown
    pub battery_remaining: i8,
}

/// One framed protocol message, tagged by kind
///
/// Produced by a telemetry source, consumed once by the decoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawProtocolMessage {
    Heartbeat(Heartbeat),
    SystemStatus(SystemStatus),
    GpsRawInt(GpsRawInt),
    Attitude(Attitude),
    GlobalPosition(GlobalPosition),
    VfrHud(VfrHud),
    BatteryStatus(BatteryStatus),
}

impl RawProtocolMessage {
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat(_))
    }
}

//! Flight mode and GPS fix lookup tables
//!
//! Mode numbers are autopilot dialect specific. ArduPilot reuses the same
//! `custom_mode` numbers for different modes on copters and planes, so the
//! vehicle class from HEARTBEAT `type` is part of the lookup key.

use tracing::debug;

/// MAV_AUTOPILOT_ARDUPILOTMEGA
pub const MAV_AUTOPILOT_ARDUPILOTMEGA: u8 = 3;
/// MAV_AUTOPILOT_PX4
pub const MAV_AUTOPILOT_PX4: u8 = 12;

/// MAV_TYPE_QUADROTOR
pub const MAV_TYPE_QUADROTOR: u8 = 2;
/// MAV_TYPE_FIXED_WING
pub const MAV_TYPE_FIXED_WING: u8 = 1;

/// Vehicle class derived from MAV_TYPE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleClass {
    Copter,
    Plane,
    Unknown,
}

impl VehicleClass {
    pub fn from_mav_type(mav_type: u8) -> Self {
        match mav_type {
            // Fixed wing and the VTOL airframes ArduPlane flies
            MAV_TYPE_FIXED_WING | 19..=25 => Self::Plane,
            // Coaxial, helicopter, quad/hexa/octo/tri, dodeca
            MAV_TYPE_QUADROTOR | 3 | 4 | 13 | 14 | 15 | 29 => Self::Copter,
            _ => Self::Unknown,
        }
    }
}

const ARDUCOPTER_MODES: &[(u32, &str)] = &[
    (0, "STABILIZE"),
    (1, "ACRO"),
    (2, "ALT_HOLD"),
    (3, "AUTO"),
    (4, "GUIDED"),
    (5, "LOITER"),
    (6, "RTL"),
    (7, "CIRCLE"),
    (9, "LAND"),
    (10, "OF_LOITER"),
    (11, "DRIFT"),
    (13, "SPORT"),
    (14, "FLIP"),
    (15, "AUTOTUNE"),
    (16, "POSHOLD"),
    (17, "BRAKE"),
    (18, "THROW"),
    (19, "AVOID_ADSB"),
    (20, "GUIDED_NOGPS"),
    (21, "SMART_RTL"),
    (22, "FLOWHOLD"),
    (23, "FOLLOW"),
    (24, "ZIGZAG"),
    (25, "SYSTEMID"),
    (26, "AUTOROTATE"),
    (27, "AUTO_RTL"),
    (28, "TURTLE"),
];

const ARDUPLANE_MODES: &[(u32, &str)] = &[
    (0, "MANUAL"),
    (1, "CIRCLE"),
    (2, "STABILIZE"),
    (3, "TRAINING"),
    (4, "ACRO"),
    (5, "FBWA"),
    (6, "FBWB"),
    (7, "CRUISE"),
    (8, "AUTOTUNE"),
    (10, "AUTO"),
    (11, "RTL"),
    (12, "LOITER"),
    (14, "AVOID_ADSB"),
    (15, "GUIDED"),
    (16, "INITIALIZING"),
    (17, "QSTABILIZE"),
    (18, "QHOVER"),
    (19, "QLOITER"),
    (20, "QLAND"),
    (21, "QRTL"),
    (22, "QAUTOTUNE"),
    (23, "QACRO"),
];

const PX4_MODES: &[(u32, &str)] = &[
    (0, "MANUAL"),
    (1, "ALTITUDE"),
    (2, "POSITION"),
    (3, "AUTO_MISSION"),
    (4, "AUTO_LOITER"),
    (5, "AUTO_RTL"),
    (6, "ACRO"),
    (7, "OFFBOARD"),
    (8, "STABILIZED"),
    (9, "RATTITUDE"),
    (10, "AUTO_TAKEOFF"),
    (11, "AUTO_LAND"),
    (12, "AUTO_FOLLOW_TARGET"),
    (13, "AUTO_PRECLAND"),
    (14, "ORBIT"),
    (15, "AUTO_VTOL_TAKEOFF"),
    (16, "AUTO_VTOL_LAND"),
];

const GPS_FIX_TYPES: &[&str] = &[
    "NO_GPS",
    "GPS_FIX_2D",
    "GPS_FIX_3D",
    "GPS_FIX_DGPS",
    "GPS_FIX_RTK_FLOAT",
    "GPS_FIX_RTK",
    "GPS_FIX_STATIC",
    "GPS_FIX_PPP",
];

fn lookup(table: &[(u32, &'static str)], mode: u32) -> Option<&'static str> {
    table.iter().find(|(n, _)| *n == mode).map(|(_, name)| *name)
}

/// Resolve a flight mode name. Never fails: unknown combinations render as
/// `MODE_<n>`.
pub fn resolve_flight_mode(custom_mode: u32, autopilot: u8, mav_type: u8) -> String {
    let table = match (autopilot, VehicleClass::from_mav_type(mav_type)) {
        (MAV_AUTOPILOT_ARDUPILOTMEGA, VehicleClass::Copter) => Some(ARDUCOPTER_MODES),
        (MAV_AUTOPILOT_ARDUPILOTMEGA, VehicleClass::Plane) => Some(ARDUPLANE_MODES),
        (MAV_AUTOPILOT_ARDUPILOTMEGA, VehicleClass::Unknown) => {
            debug!(
                "Ambiguous ArduPilot mode {} for vehicle type {}: copter and plane tables disagree",
                custom_mode, mav_type
            );
            None
        }
        (MAV_AUTOPILOT_PX4, _) => Some(PX4_MODES),
        _ => None,
    };

    table
        .and_then(|t| lookup(t, custom_mode))
        .map(str::to_string)
        .unwrap_or_else(|| format!("MODE_{}", custom_mode))
}

/// Reverse lookup in the ArduCopter table
pub fn copter_mode_number(name: &str) -> Option<u32> {
    let name = name.trim();
    ARDUCOPTER_MODES
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(mode, _)| *mode)
}

/// GPS_FIX_TYPE name, `UNKNOWN_FIX_<n>` for values outside the table
pub fn gps_fix_kind(fix_type: u8) -> String {
    GPS_FIX_TYPES
        .get(fix_type as usize)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("UNKNOWN_FIX_{}", fix_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copter_and_plane_tables_are_separate() {
        assert_eq!(
            resolve_flight_mode(0, MAV_AUTOPILOT_ARDUPILOTMEGA, MAV_TYPE_QUADROTOR),
            "STABILIZE"
        );
        assert_eq!(
            resolve_flight_mode(0, MAV_AUTOPILOT_ARDUPILOTMEGA, MAV_TYPE_FIXED_WING),
            "MANUAL"
        );
        assert_eq!(
            resolve_flight_mode(10, MAV_AUTOPILOT_ARDUPILOTMEGA, MAV_TYPE_FIXED_WING),
            "AUTO"
        );
    }

    #[test]
    fn test_px4_modes() {
        assert_eq!(resolve_flight_mode(7, MAV_AUTOPILOT_PX4, MAV_TYPE_QUADROTOR), "OFFBOARD");
        assert_eq!(resolve_flight_mode(14, MAV_AUTOPILOT_PX4, 0), "ORBIT");
    }

    #[test]
    fn test_unresolved_modes_degrade() {
        // Gap in the copter table
        assert_eq!(resolve_flight_mode(8, MAV_AUTOPILOT_ARDUPILOTMEGA, MAV_TYPE_QUADROTOR), "MODE_8");
        // Unknown autopilot dialect
        assert_eq!(resolve_flight_mode(3, 0, MAV_TYPE_QUADROTOR), "MODE_3");
        // ArduPilot without a vehicle class is not guessed
        assert_eq!(resolve_flight_mode(0, MAV_AUTOPILOT_ARDUPILOTMEGA, 0), "MODE_0");
    }

    #[test]
    fn test_gps_fix_kind() {
        assert_eq!(gps_fix_kind(0), "NO_GPS");
        assert_eq!(gps_fix_kind(3), "GPS_FIX_DGPS");
        assert_eq!(gps_fix_kind(7), "GPS_FIX_PPP");
        assert_eq!(gps_fix_kind(9), "UNKNOWN_FIX_9");
    }

    #[test]
    fn test_copter_reverse_lookup() {
        assert_eq!(copter_mode_number("guided"), Some(4));
        assert_eq!(copter_mode_number("ALT_HOLD"), Some(2));
        assert_eq!(copter_mode_number("DISARMED"), None);
    }
}

//! Message decoder
//!
//! Maps one protocol message to a partial state patch. Pure and total: a
//! message never fails to decode, it only carries fewer fields.

use std::f64::consts::{PI, TAU};

use super::modes::{gps_fix_kind, resolve_flight_mode};
use super::types::*;
use crate::vehicle_state::StatePatch;

const DEG_E7: f64 = 1e7;
const MM_PER_M: f64 = 1000.0;
const CM_PER_M: f64 = 100.0;

/// Decode a single message
pub fn decode(msg: &RawProtocolMessage) -> StatePatch {
    match msg {
        RawProtocolMessage::GlobalPosition(m) => StatePatch {
            latitude: Some(f64::from(m.lat) / DEG_E7),
            longitude: Some(f64::from(m.lon) / DEG_E7),
            altitude: Some(f64::from(m.alt) / MM_PER_M),
            ground_speed: Some(f64::from(m.vx).hypot(f64::from(m.vy)) / CM_PER_M),
            ..Default::default()
        },

        RawProtocolMessage::GpsRawInt(m) => StatePatch {
            latitude: Some(f64::from(m.lat) / DEG_E7),
            longitude: Some(f64::from(m.lon) / DEG_E7),
            altitude: Some(f64::from(m.alt) / MM_PER_M),
            ground_speed: (m.vel != u16::MAX).then(|| f64::from(m.vel) / CM_PER_M),
            satellites_visible: (m.satellites_visible != u8::MAX)
                .then(|| u32::from(m.satellites_visible)),
            gps_fix_kind: Some(gps_fix_kind(m.fix_type)),
            ..Default::default()
        },

        RawProtocolMessage::VfrHud(m) => StatePatch {
            airspeed: finite(m.airspeed),
            ground_speed: finite(m.groundspeed),
            altitude: finite(m.alt),
            climb_rate: finite(m.climb),
            throttle: Some(f64::from(m.throttle.min(100))),
            ..Default::default()
        },

        RawProtocolMessage::Attitude(m) => StatePatch {
            roll: finite(m.roll).map(normalize_angle),
            pitch: finite(m.pitch).map(normalize_angle),
            yaw: finite(m.yaw).map(normalize_angle),
            ..Default::default()
        },

        RawProtocolMessage::Heartbeat(m) => StatePatch {
            heartbeat_ok: Some(!matches!(m.system_status, MAV_STATE_UNINIT | MAV_STATE_BOOT)),
            armed: Some(m.base_mode & MAV_MODE_FLAG_SAFETY_ARMED != 0),
            flight_mode: Some(resolve_flight_mode(m.custom_mode, m.autopilot, m.mav_type)),
            ..Default::default()
        },

        RawProtocolMessage::SystemStatus(m) => StatePatch {
            battery_percent: battery(m.battery_remaining),
            ..Default::default()
        },

        RawProtocolMessage::BatteryStatus(m) => StatePatch {
            battery_percent: battery(m.battery_remaining),
            ..Default::default()
        },
    }
}

/// Decode one tick's worth of messages into a single patch.
///
/// Messages are folded in arrival order. Battery is the exception: a
/// SYS_STATUS value in the batch wins over BATTERY_STATUS regardless of order.
pub fn decode_batch(messages: &[RawProtocolMessage]) -> StatePatch {
    let mut patch = StatePatch::default();
    let mut system_battery = None;

    for msg in messages {
        let decoded = decode(msg);
        if let RawProtocolMessage::SystemStatus(_) = msg {
            if decoded.battery_percent.is_some() {
                system_battery = decoded.battery_percent;
            }
        }
        patch.merge(decoded);
    }

    if system_battery.is_some() {
        patch.battery_percent = system_battery;
    }
    patch
}

/// Wrap an angle into (-π, π]
pub fn normalize_angle(radians: f64) -> f64 {
    let wrapped = radians.rem_euclid(TAU);
    if wrapped > PI {
        wrapped - TAU
    } else {
        wrapped
    }
}

fn finite(v: f32) -> Option<f64> {
    let v = f64::from(v);
    v.is_finite().then_some(v)
}

/// Negative values mean "unknown" in the protocol
fn battery(remaining: i8) -> Option<f64> {
    (remaining >= 0).then(|| f64::from(remaining.min(100)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink::modes::{MAV_AUTOPILOT_ARDUPILOTMEGA, MAV_TYPE_QUADROTOR};

    fn heartbeat(system_status: u8) -> RawProtocolMessage {
        RawProtocolMessage::Heartbeat(Heartbeat {
            mav_type: MAV_TYPE_QUADROTOR,
            autopilot: MAV_AUTOPILOT_ARDUPILOTMEGA,
            base_mode: MAV_MODE_FLAG_SAFETY_ARMED | MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            custom_mode: 5,
            system_status,
        })
    }

    #[test]
    fn test_gps_raw_int_scenario() {
        let patch = decode(&RawProtocolMessage::GpsRawInt(GpsRawInt {
            lat: 340_522_000,
            lon: -1_182_437_000,
            alt: 100_000,
            vel: 500,
            fix_type: 3,
            satellites_visible: 12,
            ..Default::default()
        }));

        assert_eq!(patch.latitude, Some(34.0522));
        assert_eq!(patch.longitude, Some(-118.2437));
        assert_eq!(patch.altitude, Some(100.0));
        assert_eq!(patch.ground_speed, Some(5.0));
        assert_eq!(patch.gps_fix_kind.as_deref(), Some("GPS_FIX_DGPS"));
        assert_eq!(patch.satellites_visible, Some(12));
        // Nothing outside the message's field set
        assert_eq!(patch.roll, None);
        assert_eq!(patch.battery_percent, None);
        assert_eq!(patch.heartbeat_ok, None);
    }

    #[test]
    fn test_global_position_scaling() {
        for (lat, lon, alt) in [
            (900_000_000, 1_800_000_000, 0),
            (-900_000_000, -1_800_000_000, -12_345),
            (123_456_789, -98_765_432, 1_234_567),
        ] {
            let patch = decode(&RawProtocolMessage::GlobalPosition(GlobalPosition {
                lat,
                lon,
                alt,
                vx: 300,
                vy: 400,
                ..Default::default()
            }));
            assert_eq!(patch.latitude, Some(f64::from(lat) / 1e7));
            assert_eq!(patch.longitude, Some(f64::from(lon) / 1e7));
            assert_eq!(patch.altitude, Some(f64::from(alt) / 1000.0));
            assert_eq!(patch.ground_speed, Some(5.0));
        }
    }

    #[test]
    fn test_heartbeat_status() {
        let active = decode(&heartbeat(MAV_STATE_ACTIVE));
        assert_eq!(active.heartbeat_ok, Some(true));
        assert_eq!(active.armed, Some(true));
        assert_eq!(active.flight_mode.as_deref(), Some("LOITER"));

        assert_eq!(decode(&heartbeat(1)).heartbeat_ok, Some(false));
        assert_eq!(decode(&heartbeat(0)).heartbeat_ok, Some(false));
    }

    #[test]
    fn test_attitude_passthrough_and_wrap() {
        let patch = decode(&RawProtocolMessage::Attitude(Attitude {
            roll: 0.25,
            pitch: -0.5,
            yaw: 4.0,
            ..Default::default()
        }));
        assert_eq!(patch.roll, Some(0.25));
        assert_eq!(patch.pitch, Some(-0.5));
        let yaw = patch.yaw.unwrap();
        assert!((yaw - (4.0 - TAU)).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_angle_range() {
        assert_eq!(normalize_angle(PI), PI);
        assert!((normalize_angle(-PI) - PI).abs() < 1e-12);
        assert!((normalize_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-12);
        assert_eq!(normalize_angle(0.0), 0.0);
        for i in -20..=20 {
            let a = normalize_angle(i as f64 * 0.7);
            assert!(a > -PI && a <= PI, "{} out of range", a);
        }
    }

    #[test]
    fn test_non_finite_fields_absent() {
        let patch = decode(&RawProtocolMessage::VfrHud(VfrHud {
            airspeed: f32::NAN,
            groundspeed: 7.5,
            alt: f32::INFINITY,
            climb: 1.0,
            throttle: 250,
            heading: 90,
        }));
        assert_eq!(patch.airspeed, None);
        assert_eq!(patch.altitude, None);
        assert_eq!(patch.ground_speed, Some(7.5));
        assert_eq!(patch.throttle, Some(100.0));
    }

    #[test]
    fn test_unknown_gps_values_absent() {
        let patch = decode(&RawProtocolMessage::GpsRawInt(GpsRawInt {
            vel: u16::MAX,
            satellites_visible: u8::MAX,
            fix_type: 12,
            ..Default::default()
        }));
        assert_eq!(patch.ground_speed, None);
        assert_eq!(patch.satellites_visible, None);
        assert_eq!(patch.gps_fix_kind.as_deref(), Some("UNKNOWN_FIX_12"));
    }

    #[test]
    fn test_system_status_battery_wins() {
        let sys = RawProtocolMessage::SystemStatus(SystemStatus {
            battery_remaining: 64,
            ..Default::default()
        });
        let bat = RawProtocolMessage::BatteryStatus(BatteryStatus {
            battery_remaining: 70,
            ..Default::default()
        });

        assert_eq!(decode_batch(&[sys, bat]).battery_percent, Some(64.0));
        assert_eq!(decode_batch(&[bat, sys]).battery_percent, Some(64.0));
        assert_eq!(decode_batch(&[bat]).battery_percent, Some(70.0));

        // Unknown SYS_STATUS battery does not mask BATTERY_STATUS
        let unknown = RawProtocolMessage::SystemStatus(SystemStatus {
            battery_remaining: -1,
            ..Default::default()
        });
        assert_eq!(decode_batch(&[unknown, bat]).battery_percent, Some(70.0));
    }

    #[test]
    fn test_batch_arrival_order() {
        let first = RawProtocolMessage::GlobalPosition(GlobalPosition {
            alt: 50_000,
            ..Default::default()
        });
        let second = RawProtocolMessage::VfrHud(VfrHud {
            alt: 60.0,
            ..Default::default()
        });
        assert_eq!(decode_batch(&[first, second]).altitude, Some(60.0));
        assert_eq!(decode_batch(&[second, first]).altitude, Some(50.0));
        assert!(decode_batch(&[]).is_empty());
    }
}

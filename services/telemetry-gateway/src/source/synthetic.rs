//! Synthetic fallback generator
//!
//! Deterministic function of elapsed time: a closed circular orbit around a
//! home point with bounded sinusoidal altitude and speed, and a battery that
//! drains linearly down to a floor. Used only when no real producer answers.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{Producer, ProducerError};
use crate::mavlink::modes::{MAV_AUTOPILOT_ARDUPILOTMEGA, MAV_TYPE_QUADROTOR};
use crate::mavlink::parser::normalize_angle;
use crate::mavlink::*;
use crate::vehicle_state::DataOrigin;

/// Seconds per radian of orbit phase
const TIME_SCALE_SECS: f64 = 10.0;
/// Orbit radius, roughly 150 m
const ORBIT_RADIUS_DEG: f64 = 0.0015;

const BASE_ALTITUDE_M: f64 = 100.0;
const ALTITUDE_AMPLITUDE_M: f64 = 30.0;
const BASE_SPEED_MPS: f64 = 8.0;
const SPEED_AMPLITUDE_MPS: f64 = 4.0;
const ROLL_AMPLITUDE_DEG: f64 = 15.0;
const PITCH_AMPLITUDE_DEG: f64 = 10.0;

const BATTERY_START_PERCENT: f64 = 95.0;
const BATTERY_FLOOR_PERCENT: f64 = 20.0;
const BATTERY_DRAIN_PER_HOUR: f64 = 5.0;

/// ArduCopter AUTO
const SYNTHETIC_MODE: u32 = 3;
const SYNTHETIC_SATELLITES: u8 = 12;
/// GPS_FIX_TYPE_DGPS
const SYNTHETIC_FIX: u8 = 3;

/// Smooth demo trajectory used when every real producer is down
pub struct FallbackGenerator {
    home_lat: f64,
    home_lon: f64,
    started: Instant,
}

impl FallbackGenerator {
    pub fn new(home_lat: f64, home_lon: f64) -> Self {
        Self {
            home_lat,
            home_lon,
            started: Instant::now(),
        }
    }

    /// Battery level after `elapsed`, clamped at the floor
    pub fn battery_percent(elapsed: Duration) -> f64 {
        let hours = elapsed.as_secs_f64() / 3600.0;
        (BATTERY_START_PERCENT - hours * BATTERY_DRAIN_PER_HOUR).max(BATTERY_FLOOR_PERCENT)
    }

    /// The full message set for a point in time
    pub fn sample(&self, elapsed: Duration) -> Vec<RawProtocolMessage> {
        let secs = elapsed.as_secs_f64();
        let phase = secs / TIME_SCALE_SECS;

        let lat = self.home_lat + phase.sin() * ORBIT_RADIUS_DEG;
        let lon = self.home_lon + phase.cos() * ORBIT_RADIUS_DEG;
        let alt = BASE_ALTITUDE_M + (phase * 0.5).sin() * ALTITUDE_AMPLITUDE_M;
        let climb = ALTITUDE_AMPLITUDE_M * 0.5 / TIME_SCALE_SECS * (phase * 0.5).cos();
        let speed = BASE_SPEED_MPS + (phase * 0.3).sin() * SPEED_AMPLITUDE_MPS;

        // Direction of travel along the orbit: north ∝ cos, east ∝ -sin
        let north = speed * phase.cos();
        let east = -speed * phase.sin();
        let course = normalize_angle(east.atan2(north));
        let course_deg = course.to_degrees().rem_euclid(360.0);

        let roll = ((phase * 0.7).sin() * ROLL_AMPLITUDE_DEG).to_radians();
        let pitch = ((phase * 0.6).cos() * PITCH_AMPLITUDE_DEG).to_radians();
        let battery = Self::battery_percent(elapsed).round() as i8;

        let lat_e7 = (lat * 1e7).round() as i32;
        let lon_e7 = (lon * 1e7).round() as i32;
        let alt_mm = (alt * 1000.0).round() as i32;

        vec![
            RawProtocolMessage::Heartbeat(Heartbeat {
                mav_type: MAV_TYPE_QUADROTOR,
                autopilot: MAV_AUTOPILOT_ARDUPILOTMEGA,
                base_mode: MAV_MODE_FLAG_SAFETY_ARMED | MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
                custom_mode: SYNTHETIC_MODE,
                system_status: MAV_STATE_ACTIVE,
            }),
            RawProtocolMessage::GlobalPosition(GlobalPosition {
                lat: lat_e7,
                lon: lon_e7,
                alt: alt_mm,
                relative_alt: ((alt - BASE_ALTITUDE_M) * 1000.0).round() as i32,
                vx: (north * 100.0).round() as i16,
                vy: (east * 100.0).round() as i16,
                vz: (-climb * 100.0).round() as i16,
                hdg: (course_deg * 100.0).round() as u16 % 36_000,
            }),
            RawProtocolMessage::Attitude(Attitude {
                roll: roll as f32,
                pitch: pitch as f32,
                yaw: course as f32,
                ..Default::default()
            }),
            RawProtocolMessage::VfrHud(VfrHud {
                airspeed: speed as f32,
                groundspeed: speed as f32,
                heading: course_deg.round() as i16 % 360,
                throttle: 50,
                alt: alt as f32,
                climb: climb as f32,
            }),
            RawProtocolMessage::SystemStatus(SystemStatus {
                voltage_battery: 12_600,
                current_battery: 1_000,
                battery_remaining: battery,
                load: 350,
                drop_rate_comm: 0,
            }),
            RawProtocolMessage::GpsRawInt(GpsRawInt {
                lat: lat_e7,
                lon: lon_e7,
                alt: alt_mm,
                eph: 100,
                epv: 150,
                vel: (speed * 100.0).round() as u16,
                cog: (course_deg * 100.0).round() as u16 % 36_000,
                fix_type: SYNTHETIC_FIX,
                satellites_visible: SYNTHETIC_SATELLITES,
            }),
        ]
    }
}

#[async_trait]
impl Producer for FallbackGenerator {
    fn name(&self) -> &str {
        "Synthetic"
    }

    fn origin(&self) -> DataOrigin {
        DataOrigin::Synthetic
    }

    async fn fetch(&mut self) -> Result<Vec<RawProtocolMessage>, ProducerError> {
        Ok(self.sample(self.started.elapsed()))
    }
}

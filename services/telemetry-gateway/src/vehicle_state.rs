//! Vehicle state store
//!
//! Holds the single authoritative normalized vehicle state. Decoder patches are
//! merged field by field: a field absent from a patch keeps its last known good
//! value. Readers always get a complete immutable snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

/// Where the data in a snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataOrigin {
    /// Nothing applied yet
    #[default]
    None,
    Live,
    Simulator,
    /// Generated locally; demo data, not vehicle telemetry
    Synthetic,
}

impl DataOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Live => "live",
            Self::Simulator => "simulator",
            Self::Synthetic => "synthetic",
        }
    }
}

impl std::fmt::Display for DataOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial state produced by the decoder. `None` means "not carried".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,

    pub roll: Option<f64>,
    pub pitch: Option<f64>,
    pub yaw: Option<f64>,

    pub ground_speed: Option<f64>,
    pub airspeed: Option<f64>,
    pub climb_rate: Option<f64>,
    pub throttle: Option<f64>,

    pub battery_percent: Option<f64>,

    pub heartbeat_ok: Option<bool>,
    pub armed: Option<bool>,
    pub flight_mode: Option<String>,
    pub satellites_visible: Option<u32>,
    pub gps_fix_kind: Option<String>,
}

impl StatePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overlay `later` onto this patch; fields present in `later` win
    pub fn merge(&mut self, later: StatePatch) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.latitude, later.latitude);
        take(&mut self.longitude, later.longitude);
        take(&mut self.altitude, later.altitude);
        take(&mut self.roll, later.roll);
        take(&mut self.pitch, later.pitch);
        take(&mut self.yaw, later.yaw);
        take(&mut self.ground_speed, later.ground_speed);
        take(&mut self.airspeed, later.airspeed);
        take(&mut self.climb_rate, later.climb_rate);
        take(&mut self.throttle, later.throttle);
        take(&mut self.battery_percent, later.battery_percent);
        take(&mut self.heartbeat_ok, later.heartbeat_ok);
        take(&mut self.armed, later.armed);
        take(&mut self.flight_mode, later.flight_mode);
        take(&mut self.satellites_visible, later.satellites_visible);
        take(&mut self.gps_fix_kind, later.gps_fix_kind);
    }

    fn touches_position(&self) -> bool {
        self.latitude.is_some() || self.longitude.is_some() || self.altitude.is_some()
    }

    fn touches_attitude(&self) -> bool {
        self.roll.is_some() || self.pitch.is_some() || self.yaw.is_some()
    }

    fn touches_kinematics(&self) -> bool {
        self.ground_speed.is_some()
            || self.airspeed.is_some()
            || self.climb_rate.is_some()
            || self.throttle.is_some()
    }

    fn touches_power(&self) -> bool {
        self.battery_percent.is_some()
    }

    fn touches_link(&self) -> bool {
        self.heartbeat_ok.is_some()
            || self.armed.is_some()
            || self.flight_mode.is_some()
            || self.satellites_visible.is_some()
            || self.gps_fix_kind.is_some()
    }
}

/// Position in degrees and meters above the reference
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionState {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Attitude in radians, each angle in (-π, π]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttitudeState {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// Speeds in m/s, throttle in percent
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KinematicsState {
    pub ground_speed: f64,
    pub airspeed: f64,
    pub climb_rate: f64,
    pub throttle: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerState {
    /// 0-100
    pub battery_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStatus {
    pub heartbeat_ok: bool,
    pub armed: bool,
    pub flight_mode: String,
    pub satellites_visible: u32,
    pub gps_fix_kind: String,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            heartbeat_ok: false,
            armed: false,
            flight_mode: "DISCONNECTED".to_string(),
            satellites_visible: 0,
            gps_fix_kind: "NO_GPS".to_string(),
        }
    }
}

/// Last update time per logical group, Unix milliseconds. Never decreases.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStamps {
    pub position: Option<i64>,
    pub attitude: Option<i64>,
    pub kinematics: Option<i64>,
    pub power: Option<i64>,
    pub link: Option<i64>,
}

/// The authoritative normalized snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedVehicleState {
    pub position: PositionState,
    pub attitude: AttitudeState,
    pub kinematics: KinematicsState,
    pub power: PowerState,
    pub link: LinkStatus,
    pub last_updated: GroupStamps,
    /// Origin of the most recently applied patch
    pub source: DataOrigin,
}

impl NormalizedVehicleState {
    /// Merge a patch in place. Only fields present in the patch change.
    pub fn merge(&mut self, patch: &StatePatch, origin: DataOrigin, now_ms: i64) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }
        fn stamp(slot: &mut Option<i64>, now_ms: i64) {
            *slot = Some(slot.map_or(now_ms, |prev| prev.max(now_ms)));
        }

        if patch.is_empty() {
            return;
        }

        set(&mut self.position.latitude, &patch.latitude);
        set(&mut self.position.longitude, &patch.longitude);
        set(&mut self.position.altitude, &patch.altitude);
        if patch.touches_position() {
            stamp(&mut self.last_updated.position, now_ms);
        }

        set(&mut self.attitude.roll, &patch.roll);
        set(&mut self.attitude.pitch, &patch.pitch);
        set(&mut self.attitude.yaw, &patch.yaw);
        if patch.touches_attitude() {
            stamp(&mut self.last_updated.attitude, now_ms);
        }

        set(&mut self.kinematics.ground_speed, &patch.ground_speed);
        set(&mut self.kinematics.airspeed, &patch.airspeed);
        set(&mut self.kinematics.climb_rate, &patch.climb_rate);
        set(&mut self.kinematics.throttle, &patch.throttle);
        if patch.touches_kinematics() {
            stamp(&mut self.last_updated.kinematics, now_ms);
        }

        set(&mut self.power.battery_percent, &patch.battery_percent);
        if patch.touches_power() {
            stamp(&mut self.last_updated.power, now_ms);
        }

        set(&mut self.link.heartbeat_ok, &patch.heartbeat_ok);
        set(&mut self.link.armed, &patch.armed);
        set(&mut self.link.flight_mode, &patch.flight_mode);
        set(&mut self.link.satellites_visible, &patch.satellites_visible);
        set(&mut self.link.gps_fix_kind, &patch.gps_fix_kind);
        if patch.touches_link() {
            stamp(&mut self.last_updated.link, now_ms);
        }

        self.source = origin;
    }
}

/// Single-writer, many-reader store. Each apply publishes a fresh `Arc`
/// snapshot; readers clone the `Arc` and never see a half-applied patch.
pub struct VehicleStateStore {
    current: watch::Sender<Arc<NormalizedVehicleState>>,
    applied: AtomicU64,
}

impl VehicleStateStore {
    pub fn new() -> Self {
        Self::with_state(NormalizedVehicleState::default())
    }

    pub fn with_state(state: NormalizedVehicleState) -> Self {
        let (current, _) = watch::channel(Arc::new(state));
        Self {
            current,
            applied: AtomicU64::new(0),
        }
    }

    /// Apply a patch stamped with the current wall clock
    pub fn apply(&self, patch: &StatePatch, origin: DataOrigin) -> Arc<NormalizedVehicleState> {
        self.apply_at(patch, origin, chrono::Utc::now().timestamp_millis())
    }

    /// Apply a patch with an explicit timestamp
    pub fn apply_at(
        &self,
        patch: &StatePatch,
        origin: DataOrigin,
        now_ms: i64,
    ) -> Arc<NormalizedVehicleState> {
        if patch.is_empty() {
            return self.snapshot();
        }

        let mut published = None;
        self.current.send_modify(|current| {
            let mut next = NormalizedVehicleState::clone(current);
            next.merge(patch, origin, now_ms);
            let next = Arc::new(next);
            published = Some(next.clone());
            *current = next;
        });

        let count = self.applied.fetch_add(1, Ordering::Relaxed) + 1;
        if count == 1 {
            debug!("First state patch applied from {}", origin);
        }

        published.unwrap_or_else(|| self.snapshot())
    }

    /// Immutable copy of the current state
    pub fn snapshot(&self) -> Arc<NormalizedVehicleState> {
        self.current.borrow().clone()
    }

    /// Number of non-empty patches applied so far
    pub fn applied_count(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }
}

impl Default for VehicleStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position_patch(lat: f64, lon: f64, alt: f64) -> StatePatch {
        StatePatch {
            latitude: Some(lat),
            longitude: Some(lon),
            altitude: Some(alt),
            ..Default::default()
        }
    }

    #[test]
    fn test_absent_fields_untouched() {
        let store = VehicleStateStore::new();
        let initial = store.snapshot();

        store.apply_at(&position_patch(34.0, -118.0, 100.0), DataOrigin::Live, 1_000);
        store.apply_at(
            &StatePatch {
                roll: Some(0.1),
                ..Default::default()
            },
            DataOrigin::Live,
            2_000,
        );

        let state = store.snapshot();
        assert_eq!(state.position.latitude, 34.0);
        assert_eq!(state.attitude.roll, 0.1);
        // Never carried by any patch
        assert_eq!(state.power, initial.power);
        assert_eq!(state.kinematics, initial.kinematics);
        assert_eq!(state.link, initial.link);
        assert_eq!(state.attitude.pitch, initial.attitude.pitch);
        assert_eq!(state.last_updated.power, None);
        assert_eq!(state.last_updated.position, Some(1_000));
        assert_eq!(state.last_updated.attitude, Some(2_000));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let patch = StatePatch {
            battery_percent: Some(77.0),
            flight_mode: Some("LOITER".to_string()),
            ..position_patch(1.0, 2.0, 3.0)
        };

        let once = VehicleStateStore::new();
        once.apply_at(&patch, DataOrigin::Simulator, 500);

        let twice = VehicleStateStore::new();
        twice.apply_at(&patch, DataOrigin::Simulator, 500);
        twice.apply_at(&patch, DataOrigin::Simulator, 500);

        assert_eq!(*once.snapshot(), *twice.snapshot());
    }

    #[test]
    fn test_group_stamps_never_decrease() {
        let store = VehicleStateStore::new();
        store.apply_at(&position_patch(1.0, 1.0, 1.0), DataOrigin::Live, 5_000);
        // Wall clock stepped backwards
        store.apply_at(&position_patch(2.0, 2.0, 2.0), DataOrigin::Live, 4_000);

        let state = store.snapshot();
        assert_eq!(state.position.latitude, 2.0);
        assert_eq!(state.last_updated.position, Some(5_000));
    }

    #[test]
    fn test_empty_patch_changes_nothing() {
        let store = VehicleStateStore::new();
        store.apply_at(&position_patch(1.0, 1.0, 1.0), DataOrigin::Live, 1);
        let before = store.snapshot();

        store.apply_at(&StatePatch::default(), DataOrigin::Synthetic, 2);

        assert_eq!(*store.snapshot(), *before);
        assert_eq!(store.snapshot().source, DataOrigin::Live);
        assert_eq!(store.applied_count(), 1);
    }

    #[test]
    fn test_snapshot_is_detached_from_later_writes() {
        let store = VehicleStateStore::new();
        store.apply_at(&position_patch(1.0, 1.0, 1.0), DataOrigin::Live, 1);
        let held = store.snapshot();

        store.apply_at(&position_patch(9.0, 9.0, 9.0), DataOrigin::Live, 2);

        assert_eq!(held.position.latitude, 1.0);
        assert_eq!(store.snapshot().position.latitude, 9.0);
    }

    #[test]
    fn test_patch_merge_later_wins() {
        let mut patch = position_patch(1.0, 2.0, 3.0);
        patch.merge(StatePatch {
            altitude: Some(50.0),
            ground_speed: Some(4.0),
            ..Default::default()
        });

        assert_eq!(patch.latitude, Some(1.0));
        assert_eq!(patch.altitude, Some(50.0));
        assert_eq!(patch.ground_speed, Some(4.0));
    }

    #[test]
    fn test_concurrent_readers_see_whole_patches() {
        let store = Arc::new(VehicleStateStore::new());

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        let s = store.snapshot();
                        // Writer always sets all three to the same value
                        assert_eq!(s.position.latitude, s.position.longitude);
                        assert_eq!(s.position.latitude, s.position.altitude);
                    }
                })
            })
            .collect();

        for i in 0..1_000 {
            let v = i as f64;
            store.apply_at(&position_patch(v, v, v), DataOrigin::Live, i);
        }

        for r in readers {
            r.join().unwrap();
        }
    }
}

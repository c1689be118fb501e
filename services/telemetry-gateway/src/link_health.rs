//! Link health tracking
//!
//! Heartbeat recency drives a three-state machine:
//! `CONNECTED --(T_miss)--> DEGRADED --(T_lost)--> LOST`, and any heartbeat
//! resets to `CONNECTED`. Owned and mutated by the ingestion loop only; other
//! tasks see published [`ConnectionReport`]s.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

/// Missed-interval multiple before the link is degraded
pub const MISS_FACTOR: u32 = 2;
/// Missed-interval multiple before the link is lost
pub const LOST_FACTOR: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkState {
    Connected,
    Degraded,
    Lost,
}

impl LinkState {
    /// UI-facing connectivity: degraded still counts as connected
    pub fn is_connected(self) -> bool {
        !matches!(self, Self::Lost)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connected => "CONNECTED",
            Self::Degraded => "DEGRADED",
            Self::Lost => "LOST",
        };
        f.write_str(s)
    }
}

/// Current link health
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkHealth {
    pub last_heartbeat_at: Option<Instant>,
    pub consecutive_misses: u32,
    pub state: LinkState,
}

/// Serializable view of link health for consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReport {
    pub state: LinkState,
    pub is_connected: bool,
    pub consecutive_misses: u32,
    /// None until the first heartbeat
    pub last_heartbeat_age_ms: Option<u64>,
}

impl Default for ConnectionReport {
    fn default() -> Self {
        Self {
            state: LinkState::Lost,
            is_connected: false,
            consecutive_misses: 0,
            last_heartbeat_age_ms: None,
        }
    }
}

/// Heartbeat-driven link state machine
pub struct LinkHealthMonitor {
    expected_interval: Duration,
    miss_after: Duration,
    lost_after: Duration,
    created_at: Instant,
    health: LinkHealth,
    transitions: u64,
}

impl LinkHealthMonitor {
    /// Starts `LOST`: nothing has been heard yet
    pub fn new(expected_interval: Duration, now: Instant) -> Self {
        let expected_interval = expected_interval.max(Duration::from_millis(1));
        Self {
            expected_interval,
            miss_after: expected_interval * MISS_FACTOR,
            lost_after: expected_interval * LOST_FACTOR,
            created_at: now,
            health: LinkHealth {
                last_heartbeat_at: None,
                consecutive_misses: 0,
                state: LinkState::Lost,
            },
            transitions: 0,
        }
    }

    /// Record a heartbeat arrival
    pub fn observe_heartbeat(&mut self, now: Instant) {
        self.health.last_heartbeat_at = Some(now);
        self.health.consecutive_misses = 0;
        self.transition(LinkState::Connected);
    }

    /// Re-evaluate against the clock; call once per tick
    pub fn evaluate(&mut self, now: Instant) -> LinkState {
        let since = self.health.last_heartbeat_at.unwrap_or(self.created_at);
        let silent = now.saturating_duration_since(since);

        self.health.consecutive_misses =
            (silent.as_nanos() / self.expected_interval.as_nanos()).min(u32::MAX as u128) as u32;

        if self.health.last_heartbeat_at.is_none() || silent >= self.lost_after {
            self.transition(LinkState::Lost);
        } else if silent >= self.miss_after {
            self.transition(LinkState::Degraded);
        }

        self.health.state
    }

    pub fn state(&self) -> LinkState {
        self.health.state
    }

    /// Number of state changes since creation
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn report(&self, now: Instant) -> ConnectionReport {
        ConnectionReport {
            state: self.health.state,
            is_connected: self.health.state.is_connected(),
            consecutive_misses: self.health.consecutive_misses,
            last_heartbeat_age_ms: self
                .health
                .last_heartbeat_at
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
        }
    }

    fn transition(&mut self, next: LinkState) {
        let prev = self.health.state;
        if prev == next {
            return;
        }
        self.health.state = next;
        self.transitions += 1;

        match next {
            LinkState::Connected => info!("Link {} -> {}", prev, next),
            LinkState::Degraded => warn!(
                "Link {} -> {} ({} heartbeats missed)",
                prev, next, self.health.consecutive_misses
            ),
            LinkState::Lost => warn!(
                "Link {} -> {} ({} heartbeats missed)",
                prev, next, self.health.consecutive_misses
            ),
        }
    }
}

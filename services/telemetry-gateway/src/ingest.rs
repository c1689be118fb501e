//! Ingestion loop
//!
//! One tick: pull messages from the source adapter, feed heartbeats to link
//! health, decode the batch into one patch and apply it to the store. The loop
//! owns the link health monitor; everyone else reads published reports.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::link_health::{ConnectionReport, LinkHealthMonitor, LinkState};
use crate::mavlink::decode_batch;
use crate::source::TelemetrySourceAdapter;
use crate::vehicle_state::{DataOrigin, VehicleStateStore};

const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Ingestion statistics
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub ticks: u64,
    pub messages: u64,
    pub patches_applied: u64,
    pub heartbeats: u64,
    /// Non-empty batches that decoded to nothing
    pub empty_patches: u64,
}

impl std::fmt::Display for IngestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ticks: {}, messages: {}, patches: {}, heartbeats: {}, empty patches: {}",
            self.ticks, self.messages, self.patches_applied, self.heartbeats, self.empty_patches
        )
    }
}

pub struct IngestLoop {
    adapter: TelemetrySourceAdapter,
    store: Arc<VehicleStateStore>,
    monitor: LinkHealthMonitor,
    reports: watch::Sender<ConnectionReport>,
    stats: IngestStats,
}

impl IngestLoop {
    pub fn new(
        adapter: TelemetrySourceAdapter,
        store: Arc<VehicleStateStore>,
        heartbeat_interval: Duration,
    ) -> Self {
        let monitor = LinkHealthMonitor::new(heartbeat_interval, Instant::now());
        let (reports, _) = watch::channel(ConnectionReport::default());
        Self {
            adapter,
            store,
            monitor,
            reports,
            stats: IngestStats::default(),
        }
    }

    /// Receiver for link health reports, updated every tick
    pub fn link_reports(&self) -> watch::Receiver<ConnectionReport> {
        self.reports.subscribe()
    }

    pub async fn tick(&mut self) -> LinkState {
        let batch = self.adapter.next_messages(self.monitor.state()).await;
        let now = Instant::now();
        self.stats.ticks += 1;
        self.stats.messages += batch.messages.len() as u64;

        // Generated heartbeats say nothing about the vehicle link
        if batch.origin != DataOrigin::Synthetic {
            let heartbeats = batch.messages.iter().filter(|m| m.is_heartbeat()).count();
            if heartbeats > 0 {
                self.stats.heartbeats += heartbeats as u64;
                self.monitor.observe_heartbeat(now);
            }
        }

        let link = self.monitor.evaluate(now);
        self.reports.send_replace(self.monitor.report(now));

        if !batch.is_empty() {
            let patch = decode_batch(&batch.messages);
            if patch.is_empty() {
                self.stats.empty_patches += 1;
                debug!("Batch of {} from {} carried no state", batch.messages.len(), batch.origin);
            } else {
                self.store.apply(&patch, batch.origin);
                self.stats.patches_applied += 1;
            }
        }

        link
    }

    /// Tick at `interval` until `shutdown` flips to true
    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_report = Instant::now();

        info!(
            "Ingestion started: {} producers, {:?} cadence",
            self.adapter.producer_count(),
            interval
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            // Shutdown cancels an in-flight producer call
            tokio::select! {
                _ = self.tick() => {}
                _ = shutdown.changed() => break,
            }

            if last_report.elapsed() >= STATS_INTERVAL {
                info!(
                    "[Ingest] {} | link transitions: {} | {}",
                    self.stats,
                    self.monitor.transitions(),
                    self.adapter.stats()
                );
                last_report = Instant::now();
            }
        }

        info!("Ingestion stopped. {}", self.stats);
    }
}

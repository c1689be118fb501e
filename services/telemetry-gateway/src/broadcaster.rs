//! Fan-out broadcaster
//!
//! Every tick one snapshot is read from the store, a history sample is
//! appended and the resulting event is offered to each subscriber. Each
//! subscriber owns a depth-1, newest-wins slot (`watch` channel), so a stalled
//! consumer only ever misses intermediate events and never blocks the loop or
//! other subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures_util::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::history::{HistoryBuffer, HistorySample};
use crate::link_health::ConnectionReport;
use crate::vehicle_state::{NormalizedVehicleState, VehicleStateStore};

const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// One broadcast tick as seen by clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub sequence: u64,
    /// Unix milliseconds, non-decreasing across events
    pub timestamp: i64,
    pub snapshot: Arc<NormalizedVehicleState>,
    pub connection: ConnectionReport,
}

type Slot = Option<Arc<TelemetryEvent>>;

struct Subscriber {
    tx: watch::Sender<Slot>,
    last_sent_at: Option<i64>,
}

#[derive(Default)]
struct TickState {
    sequence: u64,
    last_timestamp: i64,
    latest: Slot,
}

struct Inner {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    tick: Mutex<TickState>,
    history: Mutex<HistoryBuffer>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// Cheaply cloneable handle to the shared broadcaster
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl Broadcaster {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(HashMap::new()),
                tick: Mutex::new(TickState::default()),
                history: Mutex::new(HistoryBuffer::new(history_capacity)),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a new sink. It is primed with the latest event, if any.
    /// After [`close`](Self::close) the returned handle ends immediately.
    pub fn subscribe(&self) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);

        let handle = SubscriptionHandle {
            id,
            rx,
            broadcaster: Arc::downgrade(&self.inner),
        };

        // Hold the tick lock so a concurrent publish cannot slip in between
        // priming and registration
        let tick = self.inner.tick.lock();
        if self.inner.closed.load(Ordering::SeqCst) {
            return handle;
        }
        if let Some(latest) = &tick.latest {
            tx.send_replace(Some(latest.clone()));
        }
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.insert(
            id,
            Subscriber {
                tx,
                last_sent_at: None,
            },
        );
        info!("Subscriber {} added, {} active", id, subscribers.len());

        handle
    }

    /// Remove a subscriber. Unknown or already removed ids are ignored.
    pub fn unsubscribe(&self, id: u64) {
        let mut subscribers = self.inner.subscribers.lock();
        if let Some(sub) = subscribers.remove(&id) {
            info!(
                "Subscriber {} removed (last sent at {:?}), {} active",
                id,
                sub.last_sent_at,
                subscribers.len()
            );
        }
    }

    /// Build and deliver one event. Returns `None` once closed.
    pub fn publish(
        &self,
        snapshot: Arc<NormalizedVehicleState>,
        connection: ConnectionReport,
    ) -> Option<Arc<TelemetryEvent>> {
        let mut tick = self.inner.tick.lock();
        if self.inner.closed.load(Ordering::SeqCst) {
            return None;
        }

        tick.sequence += 1;
        tick.last_timestamp = tick.last_timestamp.max(chrono::Utc::now().timestamp_millis());

        self.inner.history.lock().push(HistorySample {
            timestamp: tick.last_timestamp,
            altitude: snapshot.position.altitude,
            speed: snapshot.kinematics.ground_speed,
        });

        let event = Arc::new(TelemetryEvent {
            kind: "telemetry",
            sequence: tick.sequence,
            timestamp: tick.last_timestamp,
            snapshot,
            connection,
        });
        tick.latest = Some(event.clone());

        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|id, sub| {
            if sub.tx.is_closed() {
                debug!("Subscriber {} went away, removing", id);
                return false;
            }
            sub.tx.send_replace(Some(event.clone()));
            sub.last_sent_at = Some(event.timestamp);
            true
        });

        Some(event)
    }

    /// History samples, oldest first
    pub fn history(&self) -> Vec<HistorySample> {
        self.inner.history.lock().samples()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stop publishing and end every subscription
    pub fn close(&self) {
        let _tick = self.inner.tick.lock();
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let closed = std::mem::take(&mut *self.inner.subscribers.lock());
        info!("Broadcaster closed, {} subscribers released", closed.len());
    }

    /// Publish the store's snapshot every `interval` until `shutdown` flips
    /// or the broadcaster is closed, then close.
    pub async fn run(
        self,
        store: Arc<VehicleStateStore>,
        link: watch::Receiver<ConnectionReport>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_report = Instant::now();
        info!("Broadcaster started, {:?} cadence", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() || self.is_closed() {
                break;
            }

            let connection = link.borrow().clone();
            let Some(event) = self.publish(store.snapshot(), connection) else {
                break;
            };

            if last_report.elapsed() >= STATS_INTERVAL {
                info!(
                    "[Broadcast] sequence {} | {} subscribers",
                    event.sequence,
                    self.subscriber_count()
                );
                last_report = Instant::now();
            }
        }

        self.close();
    }
}

/// One subscriber's end of the broadcast. Dropping it unsubscribes.
pub struct SubscriptionHandle {
    id: u64,
    rx: watch::Receiver<Slot>,
    broadcaster: Weak<Inner>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. Intermediate events published while the
    /// caller was busy are skipped. `None` once the broadcaster is closed or
    /// this subscriber was removed.
    pub async fn recv(&mut self) -> Option<Arc<TelemetryEvent>> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(event) = self.rx.borrow_and_update().clone() {
                return Some(event);
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Arc<TelemetryEvent>> + Send + 'static {
        futures_util::stream::unfold(self, |mut handle| async move {
            handle.recv().await.map(|event| (event, handle))
        })
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.broadcaster.upgrade() {
            Broadcaster { inner }.unsubscribe(self.id);
        }
    }
}

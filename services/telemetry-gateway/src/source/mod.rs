//! Telemetry source adapter
//!
//! Holds the upstream producers in priority order (live link, simulator,
//! synthetic fallback). Every tick walks the list from the top with a bounded
//! timeout per producer and takes the first one that answers, so a recovered
//! higher-priority producer is picked up again on the very next tick.

mod live;
mod simulator;
mod synthetic;

pub use live::LiveLinkProducer;
pub use simulator::SimulatorProducer;
pub use synthetic::FallbackGenerator;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use crate::link_health::LinkState;
use crate::mavlink::RawProtocolMessage;
use crate::vehicle_state::DataOrigin;

/// Default per-producer timeout
pub const DEFAULT_PRODUCER_TIMEOUT: Duration = Duration::from_secs(2);

/// Producer error types
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// One upstream source of protocol messages
#[async_trait]
pub trait Producer: Send {
    /// Short name for logs
    fn name(&self) -> &str;

    fn origin(&self) -> DataOrigin;

    /// Messages available for this tick. May block on I/O; the adapter
    /// bounds the call with its timeout.
    async fn fetch(&mut self) -> Result<Vec<RawProtocolMessage>, ProducerError>;
}

/// Messages for one tick and where they came from
#[derive(Debug, Clone, PartialEq)]
pub struct SourcedBatch {
    pub origin: DataOrigin,
    pub messages: Vec<RawProtocolMessage>,
}

impl SourcedBatch {
    /// Every producer failed this tick
    pub fn exhausted() -> Self {
        Self {
            origin: DataOrigin::None,
            messages: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Adapter statistics
#[derive(Debug, Clone, Default)]
pub struct AdapterStats {
    pub ticks: u64,
    pub batches_by_origin: HashMap<DataOrigin, u64>,
    pub failovers: u64,
    pub timeouts: u64,
    pub panics: u64,
    pub exhausted: u64,
}

impl std::fmt::Display for AdapterStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = |o: DataOrigin| self.batches_by_origin.get(&o).copied().unwrap_or(0);
        write!(
            f,
            "ticks: {} (live {}, simulator {}, synthetic {}), failovers: {}, timeouts: {}, panics: {}, exhausted: {}",
            self.ticks,
            count(DataOrigin::Live),
            count(DataOrigin::Simulator),
            count(DataOrigin::Synthetic),
            self.failovers,
            self.timeouts,
            self.panics,
            self.exhausted
        )
    }
}

/// Priority-ordered producer failover
pub struct TelemetrySourceAdapter {
    producers: Vec<Box<dyn Producer>>,
    timeout: Duration,
    last_origin: DataOrigin,
    stats: AdapterStats,
}

impl TelemetrySourceAdapter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            producers: Vec::new(),
            timeout,
            last_origin: DataOrigin::None,
            stats: AdapterStats::default(),
        }
    }

    /// Append a producer below every producer already registered
    pub fn with_producer(mut self, producer: Box<dyn Producer>) -> Self {
        info!(
            "Registered producer #{}: {} ({})",
            self.producers.len() + 1,
            producer.name(),
            producer.origin()
        );
        self.producers.push(producer);
        self
    }

    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    /// Pull this tick's messages.
    ///
    /// `link` is the current link health. A live producer that is connected
    /// but quiet keeps the tick (no fall-through to demo data) as long as it
    /// served the previous tick and the link is not `LOST`.
    pub async fn next_messages(&mut self, link: LinkState) -> SourcedBatch {
        self.stats.ticks += 1;
        let mut batch = None;

        for producer in self.producers.iter_mut() {
            let origin = producer.origin();
            // A panicking producer counts as unavailable for this tick
            let fetch = AssertUnwindSafe(producer.fetch()).catch_unwind();
            let result = match tokio::time::timeout(self.timeout, fetch).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => {
                    self.stats.panics += 1;
                    error!("[{}] Producer panicked during fetch", producer.name());
                    Err(ProducerError::Unavailable("producer panicked".into()))
                }
                Err(_) => {
                    self.stats.timeouts += 1;
                    Err(ProducerError::Timeout(self.timeout))
                }
            };

            match result {
                Ok(messages) if !messages.is_empty() => {
                    batch = Some(SourcedBatch { origin, messages });
                    break;
                }
                Ok(_) if origin == DataOrigin::Live
                    && self.last_origin == DataOrigin::Live
                    && link != LinkState::Lost =>
                {
                    batch = Some(SourcedBatch {
                        origin,
                        messages: Vec::new(),
                    });
                    break;
                }
                Ok(_) => {
                    debug!("[{}] No data this tick, trying next producer", producer.name());
                }
                Err(e) => {
                    debug!("[{}] {}, trying next producer", producer.name(), e);
                }
            }
            self.stats.failovers += 1;
        }

        let batch = batch.unwrap_or_else(SourcedBatch::exhausted);
        if batch.origin == DataOrigin::None {
            self.stats.exhausted += 1;
        }
        *self.stats.batches_by_origin.entry(batch.origin).or_default() += 1;

        if batch.origin != self.last_origin {
            if batch.origin == DataOrigin::None {
                warn!("All producers unavailable (was {}), holding last state", self.last_origin);
            } else {
                info!("Telemetry source: {} -> {}", self.last_origin, batch.origin);
            }
            self.last_origin = batch.origin;
        }

        batch
    }

    pub fn stats(&self) -> &AdapterStats {
        &self.stats
    }
}

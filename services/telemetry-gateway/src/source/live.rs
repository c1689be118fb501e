//! Live link producer
//!
//! A background task holds a TCP connection to a MAVLink bridge that emits
//! one JSON record per line. Records are converted at ingress and queued;
//! each tick drains the queue without blocking.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Producer, ProducerError};
use crate::mavlink::{parse_line, RawProtocolMessage};
use crate::vehicle_state::DataOrigin;

/// Pending messages between ticks; overflow is dropped
const QUEUE_CAPACITY: usize = 1024;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Default)]
struct LinkCounters {
    connected: AtomicBool,
    received: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
}

/// Connection-backed producer with automatic reconnection
pub struct LiveLinkProducer {
    addr: String,
    rx: mpsc::Receiver<RawProtocolMessage>,
    counters: Arc<LinkCounters>,
    reader: JoinHandle<()>,
}

impl LiveLinkProducer {
    /// Start the reader task. It stops when `shutdown` flips to true or the
    /// producer is dropped.
    pub fn spawn(addr: &str, shutdown: watch::Receiver<bool>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let counters = Arc::new(LinkCounters::default());
        let reader = tokio::spawn(run_reader(
            addr.to_string(),
            tx,
            counters.clone(),
            shutdown,
        ));

        Self {
            addr: addr.to_string(),
            rx,
            counters,
            reader,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.counters.connected.load(Ordering::SeqCst)
    }
}

impl Drop for LiveLinkProducer {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Producer for LiveLinkProducer {
    fn name(&self) -> &str {
        "LiveLink"
    }

    fn origin(&self) -> DataOrigin {
        DataOrigin::Live
    }

    async fn fetch(&mut self) -> Result<Vec<RawProtocolMessage>, ProducerError> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            messages.push(msg);
        }

        if messages.is_empty() && !self.is_connected() {
            return Err(ProducerError::Unavailable(format!(
                "not connected to {}",
                self.addr
            )));
        }
        Ok(messages)
    }
}

async fn run_reader(
    addr: String,
    tx: mpsc::Sender<RawProtocolMessage>,
    counters: Arc<LinkCounters>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("[LiveLink] Connecting to bridge: {}", addr);

    while !*shutdown.borrow() {
        let stream = tokio::select! {
            result = TcpStream::connect(&addr) => result,
            _ = shutdown.changed() => break,
        };

        match stream {
            Ok(stream) => {
                info!("[LiveLink] Connected to {}", addr);
                counters.connected.store(true, Ordering::SeqCst);
                let stop = read_lines(stream, &tx, &counters, &mut shutdown).await;
                counters.connected.store(false, Ordering::SeqCst);
                if stop {
                    break;
                }
                warn!("[LiveLink] Connection to {} closed. Reconnecting in 2s...", addr);
            }
            Err(e) => {
                debug!("[LiveLink] Failed to connect to {}: {}. Retrying in 2s...", addr, e);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = shutdown.changed() => break,
        }
    }

    counters.connected.store(false, Ordering::SeqCst);
    info!(
        "[LiveLink] Reader stopped. Records: {}, rejected: {}, dropped: {}",
        counters.received.load(Ordering::Relaxed),
        counters.rejected.load(Ordering::Relaxed),
        counters.dropped.load(Ordering::Relaxed)
    );
}

/// Read records until the connection ends. Returns true when the reader
/// should stop for good.
async fn read_lines(
    stream: TcpStream,
    tx: &mpsc::Sender<RawProtocolMessage>,
    counters: &LinkCounters,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let mut lines = BufReader::new(stream).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.changed() => return true,
        };

        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_line(&line) {
                    Ok(msg) => {
                        counters.received.fetch_add(1, Ordering::Relaxed);
                        match tx.try_send(msg) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                counters.dropped.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => return true,
                        }
                    }
                    Err(e) => {
                        counters.rejected.fetch_add(1, Ordering::Relaxed);
                        debug!("[LiveLink] Rejected record: {}", e);
                    }
                }
            }
            Ok(None) => return false,
            Err(e) => {
                warn!("[LiveLink] Read error: {}", e);
                return false;
            }
        }
    }
}

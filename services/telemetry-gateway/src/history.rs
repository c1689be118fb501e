//! Bounded rolling history for trend charts

use std::collections::VecDeque;

use serde::Serialize;

/// Default capacity: 30 samples at 100 ms is about 3 s of trend
pub const DEFAULT_HISTORY_CAPACITY: usize = 30;

/// One charted point
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySample {
    /// Unix milliseconds
    pub timestamp: i64,
    /// Meters
    pub altitude: f64,
    /// Ground speed in m/s
    pub speed: f64,
}

/// Fixed-capacity FIFO; the oldest sample is evicted on overflow
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    samples: VecDeque<HistorySample>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: HistorySample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// All samples, oldest first
    pub fn samples(&self) -> Vec<HistorySample> {
        self.samples.iter().copied().collect()
    }
}

// packages/engine/src/runtime/latency.rs
//! Bounded latency window and throughput tracking
//!
//! Keeps the most recent `capacity` samples in a ring, so percentile
//! computation costs O(window) no matter how many requests were processed.

use std::collections::VecDeque;

const THROUGHPUT_WINDOW_MS: u64 = 60_000;

/// Summary of the current window
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencySummary {
    pub avg_ms: f64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub samples: usize,
}

/// Ring buffer of latency samples plus completion timestamps
#[derive(Debug)]
pub struct LatencyWindow {
    capacity: usize,
    samples: VecDeque<u64>,
    completions: VecDeque<u64>,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
            completions: VecDeque::new(),
        }
    }

    /// Record one completed execution
    pub fn record(&mut self, latency_ms: u64, completed_at_ms: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);

        self.completions.push_back(completed_at_ms);
        self.prune(completed_at_ms);
    }

    fn prune(&mut self, now_ms: u64) {
        let horizon = now_ms.saturating_sub(THROUGHPUT_WINDOW_MS);
        while self.completions.front().is_some_and(|&at| at < horizon) {
            self.completions.pop_front();
        }
    }

    /// Completions within the trailing minute
    pub fn throughput_per_minute(&mut self, now_ms: u64) -> u64 {
        self.prune(now_ms);
        self.completions.len() as u64
    }

    pub fn summary(&self) -> LatencySummary {
        if self.samples.is_empty() {
            return LatencySummary::default();
        }

        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let total: u64 = sorted.iter().sum();

        LatencySummary {
            avg_ms: total as f64 / sorted.len() as f64,
            p95_ms: percentile(&sorted, 0.95),
            p99_ms: percentile(&sorted, 0.99),
            samples: sorted.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Value at index `floor(n * p)` of an ascending slice, clamped to the last
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = ((sorted.len() as f64) * p).floor() as usize;
    sorted[index.min(sorted.len() - 1)]
}

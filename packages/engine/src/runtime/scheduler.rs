// packages/engine/src/runtime/scheduler.rs
//! Bounded priority scheduler for admitted work
//!
//! Entries are ordered by priority (higher first), then by enqueue time, then
//! by admission ticket, so equal-priority work is strictly FIFO.
//!
//! # Capacity accounting
//!
//! ```text
//! enqueue ──► [ pending heap ] ──dequeue──► reserved ──complete──► (slot freed)
//!                    ▲                          │
//!                    └────────── requeue ───────┘
//! ```
//!
//! A dequeued entry keeps its slot reserved until the pool reports the
//! execution finished (`complete`) or hands the entry back (`requeue`). The
//! depth reported to callers is `pending + reserved`, which never exceeds the
//! configured capacity.

use crate::runtime::types::QueueEntry;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use thiserror::Error;
use tracing::{trace, warn};

/// Returned by [`Scheduler::enqueue`] when the queue is at capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("scheduler queue is full ({max_queue_size} entries)")]
pub struct QueueFullError {
    pub max_queue_size: usize,
}

/// Heap wrapper implementing the dequeue order
#[derive(Debug)]
struct Ranked(QueueEntry);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest element: earlier entries must rank higher
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.enqueued_at_ms.cmp(&self.0.enqueued_at_ms))
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    pending: BinaryHeap<Ranked>,
    reserved: usize,
    enqueued_total: u64,
    rejected_total: u64,
}

/// Bounded in-memory priority queue
#[derive(Debug)]
pub struct Scheduler {
    max_queue_size: usize,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    /// Create a scheduler holding at most `max_queue_size` entries
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            max_queue_size,
            state: Mutex::new(SchedulerState {
                pending: BinaryHeap::with_capacity(max_queue_size),
                ..Default::default()
            }),
        }
    }

    /// Admit an entry, or refuse it without side effects when full
    pub fn enqueue(&self, entry: QueueEntry) -> Result<(), QueueFullError> {
        let mut state = self.state.lock();

        if state.pending.len() + state.reserved >= self.max_queue_size {
            state.rejected_total += 1;
            trace!(request_id = %entry.id, "Queue full, rejecting entry");
            return Err(QueueFullError {
                max_queue_size: self.max_queue_size,
            });
        }

        trace!(request_id = %entry.id, priority = entry.priority.as_str(), "Enqueued entry");
        state.pending.push(Ranked(entry));
        state.enqueued_total += 1;
        Ok(())
    }

    /// Take the highest-ranked entry, reserving its slot
    pub fn dequeue(&self) -> Option<QueueEntry> {
        let mut state = self.state.lock();
        let Ranked(entry) = state.pending.pop()?;
        state.reserved += 1;
        Some(entry)
    }

    /// Hand a dequeued entry back; it keeps its original rank
    pub fn requeue(&self, entry: QueueEntry) {
        let mut state = self.state.lock();
        if state.reserved == 0 {
            // Not from `dequeue`; admit it anyway rather than lose it
            warn!(request_id = %entry.id, "Requeue without a reserved slot");
        } else {
            state.reserved -= 1;
        }
        state.pending.push(Ranked(entry));
    }

    /// Release the slot of a dequeued entry whose execution has finished
    pub fn complete(&self) {
        let mut state = self.state.lock();
        state.reserved = state.reserved.saturating_sub(1);
    }

    /// Withdraw a still-pending entry by its ticket
    pub fn remove(&self, seq: u64) -> Option<QueueEntry> {
        let mut state = self.state.lock();
        if !state.pending.iter().any(|ranked| ranked.0.seq == seq) {
            return None;
        }

        let mut removed = None;
        let remaining: Vec<Ranked> = std::mem::take(&mut state.pending)
            .into_vec()
            .into_iter()
            .filter_map(|ranked| {
                if ranked.0.seq == seq {
                    removed = Some(ranked.0);
                    None
                } else {
                    Some(ranked)
                }
            })
            .collect();
        state.pending = BinaryHeap::from(remaining);
        removed
    }

    /// Withdraw every pending entry (reserved slots are untouched)
    pub fn drain_pending(&self) -> Vec<QueueEntry> {
        let mut state = self.state.lock();
        std::mem::take(&mut state.pending)
            .into_sorted_vec()
            .into_iter()
            .rev()
            .map(|ranked| ranked.0)
            .collect()
    }

    /// Entries admitted and not yet finished (pending + reserved)
    pub fn queue_depth(&self) -> usize {
        let state = self.state.lock();
        state.pending.len() + state.reserved
    }

    /// Entries waiting for a worker
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn capacity(&self) -> usize {
        self.max_queue_size
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.state.lock();
        SchedulerStats {
            pending: state.pending.len(),
            reserved: state.reserved,
            capacity: self.max_queue_size,
            enqueued_total: state.enqueued_total,
            rejected_total: state.rejected_total,
        }
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    pub pending: usize,
    pub reserved: usize,
    pub capacity: usize,
    pub enqueued_total: u64,
    pub rejected_total: u64,
}

impl SchedulerStats {
    /// Calculate fill percentage
    pub fn fill_percentage(&self) -> f64 {
        if self.capacity == 0 {
            return 100.0;
        }
        ((self.pending + self.reserved) as f64 / self.capacity as f64) * 100.0
    }
}

// packages/engine/src/utils/clock.rs
//! Injectable time source
//!
//! The pool never reads the wall clock directly. Everything that measures
//! latency, waits on a deadline or polls during shutdown goes through a
//! [`Clock`], so tests can drive time explicitly.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Monotonic time source with an asynchronous `after` signal
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Milliseconds elapsed since an arbitrary, fixed origin
    fn now_ms(&self) -> u64;

    /// Completes once `duration` has elapsed on this clock
    async fn sleep(&self, duration: Duration);
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by `tokio::time`
///
/// Honours tokio's paused test time, so `#[tokio::test(start_paused = true)]`
/// runs deterministically.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that only moves when [`ManualClock::advance`] is called
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<watch::Sender<u64>>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        let (tx, _rx) = watch::channel(start_ms);
        Self { now: Arc::new(tx) }
    }

    /// Move time forward, waking every sleeper whose deadline passed
    pub fn advance(&self, duration: Duration) {
        let step = duration.as_millis() as u64;
        self.now.send_modify(|now| *now += step);
    }

    pub fn set(&self, now_ms: u64) {
        self.now.send_replace(now_ms);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        *self.now.borrow()
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now_ms() + duration.as_millis() as u64;
        let mut rx = self.now.subscribe();
        // The sender lives as long as `self`, so this only ends at the deadline
        let _ = rx.wait_for(|now| *now >= deadline).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock::new();
        assert_eq!(clock.now_ms(), 0);

        clock.sleep(Duration::from_millis(1500)).await;
        assert_eq!(clock.now_ms(), 1500);
    }

    #[tokio::test]
    async fn test_manual_clock_wakes_sleeper_on_advance() {
        let clock = ManualClock::new(1_000);
        let sleeper = {
            let clock = clock.clone();
            tokio::spawn(async move {
                clock.sleep(Duration::from_millis(100)).await;
                clock.now_ms()
            })
        };

        tokio::task::yield_now().await;
        clock.advance(Duration::from_millis(50));
        tokio::task::yield_now().await;
        assert!(!sleeper.is_finished());

        clock.advance(Duration::from_millis(50));
        assert_eq!(sleeper.await.unwrap(), 1_100);
    }

    #[test]
    fn test_manual_clock_set() {
        let clock = ManualClock::new(0);
        clock.set(42);
        assert_eq!(clock.now_ms(), 42);
    }
}

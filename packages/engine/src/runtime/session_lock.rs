// packages/engine/src/runtime/session_lock.rs
//! Per-session mutual exclusion with bounded, FIFO waiting
//!
//! Each session ID maps to a fair `tokio::sync::Mutex`. Holders receive a
//! [`SessionToken`]; dropping the token releases the session, so every exit
//! path of the caller releases it. Waiters on the same session are granted the
//! lock in the order they started waiting.
//!
//! Table entries are created on first use and removed when the last holder
//! or waiter goes away.

use crate::utils::clock::SharedClock;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// The session lock was not acquired within the timeout
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("timed out after {waited_ms}ms waiting for session '{session_id}'")]
pub struct LockTimeoutError {
    pub session_id: String,
    pub waited_ms: u64,
}

/// Exclusive hold on one session; released on drop
#[derive(Debug)]
pub struct SessionToken {
    session_id: String,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
}

impl SessionToken {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionToken {
    fn drop(&mut self) {
        // Unlock first so the strong count below only sees waiters
        drop(self.guard.take());
        self.table
            .remove_if(&self.session_id, |_, lock| Arc::strong_count(lock) == 1);
        trace!(session_id = %self.session_id, "Session released");
    }
}

/// Table of per-session locks
pub struct SessionLock {
    table: Arc<LockTable>,
    clock: SharedClock,
}

impl SessionLock {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            table: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Acquire exclusive access to `session_id`, waiting at most `timeout`
    pub async fn acquire(
        &self,
        session_id: &str,
        timeout: Duration,
    ) -> Result<SessionToken, LockTimeoutError> {
        let lock = self
            .table
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let started = self.clock.now_ms();

        // Fast path keeps an uncontended acquire free of timer work
        let guard = match lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(session_id, "Session busy, waiting");
                tokio::select! {
                    guard = lock.clone().lock_owned() => guard,
                    _ = self.clock.sleep(timeout) => {
                        drop(lock);
                        self.table
                            .remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1);
                        return Err(LockTimeoutError {
                            session_id: session_id.to_string(),
                            waited_ms: self.clock.now_ms().saturating_sub(started),
                        });
                    }
                }
            }
        };
        drop(lock);

        trace!(session_id, "Session acquired");
        Ok(SessionToken {
            session_id: session_id.to_string(),
            guard: Some(guard),
            table: Arc::clone(&self.table),
        })
    }

    /// Release a session explicitly (equivalent to dropping the token)
    pub fn release(&self, token: SessionToken) {
        drop(token);
    }

    /// Whether the session is currently held
    pub fn is_locked(&self, session_id: &str) -> bool {
        self.table
            .get(session_id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Sessions with a holder or waiters
    pub fn active_sessions(&self) -> usize {
        self.table.len()
    }
}

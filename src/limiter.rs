//! Concurrency limiter: named counting semaphores with FIFO waiters.
//!
//! Each key is backed by a fair `tokio::sync::Semaphore`. A released slot goes
//! to the oldest waiter, and dropping a waiting `acquire` returns any slot
//! that was granted to it before it could be observed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, TryAcquireError};
use tracing::{debug, warn};

use crate::config::LimiterConfig;
use crate::error::LimiterError;

struct KeyState {
    semaphore: Arc<Semaphore>,
    limit: usize,
    /// Slots still held above a lowered limit. Absorbed by releases.
    excess: usize,
    waiting: Arc<AtomicUsize>,
}

impl KeyState {
    fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            excess: 0,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn active(&self) -> usize {
        (self.limit + self.excess).saturating_sub(self.semaphore.available_permits())
    }
}

/// Counts a queued waiter for as long as it is alive.
struct QueuedGuard(Arc<AtomicUsize>);

impl QueuedGuard {
    fn new(waiting: &Arc<AtomicUsize>) -> Self {
        waiting.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(waiting))
    }
}

impl Drop for QueuedGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct LimiterState {
    keys: HashMap<String, KeyState>,
    limits: HashMap<String, usize>,
}

impl LimiterState {
    fn limit_for(&self, key: &str, default_limit: usize) -> usize {
        self.limits.get(key).copied().unwrap_or(default_limit)
    }
}

/// Per-key slot counter with FIFO queuing and acquisition timeout.
pub struct ConcurrencyLimiter {
    default_limit: usize,
    state: Mutex<LimiterState>,
}

impl ConcurrencyLimiter {
    /// Create a limiter from config.
    pub fn new(config: &LimiterConfig) -> Self {
        Self {
            default_limit: config.default_limit.max(1),
            state: Mutex::new(LimiterState {
                limits: config.per_key_limits.clone(),
                ..Default::default()
            }),
        }
    }

    /// Limiter with the same limit for every key.
    pub fn with_default_limit(limit: usize) -> Self {
        Self::new(&LimiterConfig {
            default_limit: limit,
            ..Default::default()
        })
    }

    /// Set the limit for one key. Raising a limit grants queued waiters;
    /// lowering it takes effect as holders release.
    pub async fn set_limit(&self, key: &str, limit: usize) {
        let limit = limit.max(1);
        let mut state = self.state.lock().await;
        state.limits.insert(key.to_string(), limit);
        let Some(entry) = state.keys.get_mut(key) else {
            return;
        };

        if limit > entry.limit {
            let mut extra = limit - entry.limit;
            let absorbed = extra.min(entry.excess);
            entry.excess -= absorbed;
            extra -= absorbed;
            entry.semaphore.add_permits(extra);
        } else {
            let shrink = entry.limit - limit;
            let forgotten = entry.semaphore.forget_permits(shrink);
            entry.excess += shrink - forgotten;
        }
        entry.limit = limit;
    }

    /// Effective limit for a key.
    pub async fn limit(&self, key: &str) -> usize {
        let state = self.state.lock().await;
        state.limit_for(key, self.default_limit)
    }

    /// Take a slot, waiting up to `timeout` behind earlier waiters.
    ///
    /// A timeout removes only this waiter; other waiters and holders are
    /// unaffected. Dropping the returned future while it waits never leaks
    /// a slot.
    pub async fn acquire(&self, key: &str, timeout: Duration) -> Result<(), LimiterError> {
        let (semaphore, _queued) = {
            let mut state = self.state.lock().await;
            let limit = state.limit_for(key, self.default_limit);
            let entry = state
                .keys
                .entry(key.to_string())
                .or_insert_with(|| KeyState::new(limit));

            match Arc::clone(&entry.semaphore).try_acquire_owned() {
                Ok(permit) => {
                    permit.forget();
                    return Ok(());
                }
                Err(TryAcquireError::Closed) => {
                    return Err(LimiterError::Cleared {
                        key: key.to_string(),
                    });
                }
                Err(TryAcquireError::NoPermits) => {}
            }

            let queued = QueuedGuard::new(&entry.waiting);
            debug!(
                key,
                queued = entry.waiting.load(Ordering::SeqCst),
                "Waiting for concurrency slot"
            );
            (Arc::clone(&entry.semaphore), queued)
        };

        match tokio::time::timeout(timeout, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                Ok(())
            }
            Ok(Err(_)) => Err(LimiterError::Cleared {
                key: key.to_string(),
            }),
            Err(_) => {
                warn!(key, ?timeout, "Timed out waiting for concurrency slot");
                Err(LimiterError::Timeout {
                    key: key.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Return a slot. Hands it to the oldest waiter if any.
    pub async fn release(&self, key: &str) {
        let mut state = self.state.lock().await;
        let Some(entry) = state.keys.get_mut(key) else {
            warn!(key, "Release for key with no active slots");
            return;
        };
        if entry.active() == 0 {
            warn!(key, "Release without matching acquire");
            return;
        }
        if entry.excess > 0 {
            entry.excess -= 1;
        } else {
            entry.semaphore.add_permits(1);
        }
    }

    /// Fail every queued waiter and reset all counters.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        let dropped: usize = state
            .keys
            .values()
            .map(|k| k.waiting.load(Ordering::SeqCst))
            .sum();
        for entry in state.keys.values() {
            // Closing fails the waiters with `Cleared`.
            entry.semaphore.close();
        }
        state.keys.clear();
        if dropped > 0 {
            debug!(count = dropped, "Cleared queued limiter waiters");
        }
    }

    /// Slots currently held for a key.
    pub async fn active(&self, key: &str) -> usize {
        self.state.lock().await.keys.get(key).map_or(0, KeyState::active)
    }

    /// Waiters currently queued for a key.
    pub async fn queued(&self, key: &str) -> usize {
        self.state
            .lock()
            .await
            .keys
            .get(key)
            .map_or(0, |k| k.waiting.load(Ordering::SeqCst))
    }
}

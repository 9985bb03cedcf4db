//! In-memory lease lock service.
//!
//! Leases expire on the tokio clock, so tests can use `tokio::time::pause`
//! to expire them deterministically. Waiters wake on every release and poll
//! for expiry at a short interval.

use chrono::Utc;
use seatguard_core::lock::{LockFuture, LockService, ReleaseOutcome};
use seatguard_core::{LeaseRequest, LockError, LockLease};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct Held {
    token: Uuid,
    expires: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    leases: Mutex<HashMap<String, Held>>,
    released: Notify,
}

/// In-memory implementation of [`LockService`].
#[derive(Debug, Clone)]
pub struct InMemoryLockService {
    inner: Arc<Inner>,
    poll_interval: Duration,
}

impl Default for InMemoryLockService {
    fn default() -> Self {
        Self {
            inner: Arc::default(),
            poll_interval: Duration::from_millis(5),
        }
    }
}

impl InMemoryLockService {
    /// Create a service with no leases held.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire a lease immediately, as if its lease time had run out.
    ///
    /// Used to simulate a holder that outlives its lease.
    pub fn force_expire(&self, key: &str) {
        let mut leases = self.leases();
        if let Some(held) = leases.get_mut(key) {
            held.expires = Instant::now();
        }
        drop(leases);
        self.inner.released.notify_waiters();
    }

    /// Whether any unexpired lease exists for `key`.
    #[must_use]
    pub fn is_locked(&self, key: &str) -> bool {
        self.leases()
            .get(key)
            .is_some_and(|held| held.expires > Instant::now())
    }

    fn leases(&self) -> std::sync::MutexGuard<'_, HashMap<String, Held>> {
        self.inner
            .leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn try_take(&self, request: &LeaseRequest) -> bool {
        let now = Instant::now();
        let mut leases = self.leases();
        let free = leases
            .get(&request.key)
            .is_none_or(|held| held.expires <= now);
        if free {
            leases.insert(
                request.key.clone(),
                Held {
                    token: request.holder_token,
                    expires: now + request.lease_time,
                },
            );
        }
        free
    }
}

impl LockService for InMemoryLockService {
    fn acquire(&self, request: LeaseRequest) -> LockFuture<'_, LockLease> {
        Box::pin(async move {
            let started = Instant::now();
            let deadline = started + request.wait_time;
            let lease_time = chrono::Duration::from_std(request.lease_time)
                .map_err(|e| LockError::Backend(e.to_string()))?;

            loop {
                let released = self.inner.released.notified();

                if self.try_take(&request) {
                    return Ok(LockLease {
                        key: request.key,
                        holder_token: request.holder_token,
                        expires_at: Utc::now() + lease_time,
                    });
                }

                let now = Instant::now();
                if now >= deadline {
                    return Err(LockError::Timeout {
                        key: request.key,
                        waited: now - started,
                    });
                }

                let wake_at = deadline.min(now + self.poll_interval);
                let _ = tokio::time::timeout_at(wake_at, released).await;
            }
        })
    }

    fn release(&self, key: &str, holder_token: Uuid) -> LockFuture<'_, ReleaseOutcome> {
        let key = key.to_string();
        Box::pin(async move {
            let mut leases = self.leases();
            let outcome = match leases.get(&key) {
                Some(held) if held.token == holder_token => {
                    let live = held.expires > Instant::now();
                    leases.remove(&key);
                    if live {
                        ReleaseOutcome::Released
                    } else {
                        ReleaseOutcome::AlreadyExpired
                    }
                }
                _ => ReleaseOutcome::AlreadyExpired,
            };
            drop(leases);

            self.inner.released.notify_waiters();
            Ok(outcome)
        })
    }

    fn is_held(&self, key: &str, holder_token: Uuid) -> LockFuture<'_, bool> {
        let key = key.to_string();
        Box::pin(async move {
            Ok(self
                .leases()
                .get(&key)
                .is_some_and(|held| held.token == holder_token && held.expires > Instant::now()))
        })
    }
}

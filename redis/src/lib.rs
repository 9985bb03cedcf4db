//! Redis lease locks for seatguard.
//!
//! # Architecture
//!
//! A lease is a single Redis key holding the holder's token:
//! - **Acquire**: `SET {key} {token} NX PX {lease_ms}`, polled until the wait time runs out
//! - **Expiry**: the `PX` TTL, so a crashed holder frees the key on its own
//! - **Release**: a Lua compare-and-delete, so a holder can never delete a lease
//!   that expired and was re-acquired by someone else
//!
//! # Example
//!
//! ```no_run
//! use seatguard_redis::RedisLockService;
//! use seatguard_core::lock::LockService;
//! use seatguard_core::LeaseRequest;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let locks = RedisLockService::new("redis://127.0.0.1:6379").await?;
//! let lease = locks
//!     .acquire(LeaseRequest::new("resource-lock:1", Duration::from_secs(5), Duration::from_secs(10)))
//!     .await?;
//! locks.release(&lease.key, lease.holder_token).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use seatguard_core::lock::{LockFuture, LockService, ReleaseOutcome};
use seatguard_core::{LeaseRequest, LockError, LockLease};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

const RELEASE_SCRIPT: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
";

/// Default pause between `SET NX` attempts while a lease is held elsewhere.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// [`LockService`] backed by Redis keys with a TTL.
///
/// `Clone` is cheap: clones share one `ConnectionManager`.
#[derive(Clone)]
pub struct RedisLockService {
    conn_manager: ConnectionManager,
    release_script: Script,
    poll_interval: Duration,
}

impl RedisLockService {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Backend`] if the URL is malformed or the
    /// connection fails.
    pub async fn new(redis_url: &str) -> Result<Self, LockError> {
        let client = Client::open(redis_url)
            .map_err(|e| LockError::Backend(format!("Failed to create Redis client: {e}")))?;
        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            LockError::Backend(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!("RedisLockService initialized");

        Ok(Self {
            conn_manager,
            release_script: Script::new(RELEASE_SCRIPT),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Change how often a waiting caller retries `SET NX`.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    async fn try_set(&self, key: &str, token: Uuid, lease_time: Duration) -> Result<bool, LockError> {
        let mut conn = self.conn_manager.clone();
        let lease_ms = u64::try_from(lease_time.as_millis()).unwrap_or(u64::MAX).max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token.to_string())
            .arg("NX")
            .arg("PX")
            .arg(lease_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(format!("Failed to set lease '{key}': {e}")))?;

        Ok(reply.is_some())
    }
}

impl LockService for RedisLockService {
    fn acquire(&self, request: LeaseRequest) -> LockFuture<'_, LockLease> {
        Box::pin(async move {
            let deadline = Instant::now() + request.wait_time;
            let lease_time = chrono::Duration::from_std(request.lease_time)
                .map_err(|e| LockError::Backend(e.to_string()))?;

            loop {
                if self
                    .try_set(&request.key, request.holder_token, request.lease_time)
                    .await?
                {
                    tracing::debug!(key = %request.key, "Lease acquired");
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
                        waited: request.wait_time,
                    });
                }
                tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
            }
        })
    }

    fn release(&self, key: &str, holder_token: Uuid) -> LockFuture<'_, ReleaseOutcome> {
        let key = key.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let deleted: i64 = self
                .release_script
                .key(&key)
                .arg(holder_token.to_string())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| LockError::Backend(format!("Failed to release lease '{key}': {e}")))?;

            if deleted == 1 {
                Ok(ReleaseOutcome::Released)
            } else {
                Ok(ReleaseOutcome::AlreadyExpired)
            }
        })
    }

    fn is_held(&self, key: &str, holder_token: Uuid) -> LockFuture<'_, bool> {
        let key = key.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let holder: Option<String> = conn
                .get(&key)
                .await
                .map_err(|e| LockError::Backend(format!("Failed to read lease '{key}': {e}")))?;
            Ok(holder.is_some_and(|token| token == holder_token.to_string()))
        })
    }
}

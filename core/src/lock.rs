//! Distributed lease lock contract.
//!
//! A lock service hands out time-bounded leases keyed by resource. Leases expire
//! on their own so that a crashed holder cannot block a resource forever; that
//! expiry is a safety net, not a release mechanism. Holders always release
//! explicitly.
//!
//! # Configuration Contract
//!
//! `lease_time` must be longer than the longest expected critical section.
//! A lease that expires while its holder is still working means two callers may
//! be inside the critical section at once.

use crate::error::LockError;
use crate::model::{LeaseRequest, LockLease};
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// Boxed future returned by lock service operations.
pub type LockFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LockError>> + Send + 'a>>;

/// Result of releasing a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The lease was held under this token and is now released.
    Released,
    /// Nothing to release: the lease had already expired (or was never obtained).
    AlreadyExpired,
}

/// External coordination service for mutual exclusion across processes.
pub trait LockService: Send + Sync {
    /// Acquire the lease described by `request`, waiting up to `request.wait_time`.
    ///
    /// # Errors
    ///
    /// - `Timeout`: not acquired within the wait time
    /// - `Interrupted`: the wait was cut short (shutdown)
    /// - `Backend`: service failure
    fn acquire(&self, request: LeaseRequest) -> LockFuture<'_, LockLease>;

    /// Release the lease if it is still held under `holder_token`.
    ///
    /// Never releases a lease held by another token.
    ///
    /// # Errors
    ///
    /// - `Backend`: service failure
    fn release(&self, key: &str, holder_token: Uuid) -> LockFuture<'_, ReleaseOutcome>;

    /// Whether the lease is still held under `holder_token`.
    ///
    /// # Errors
    ///
    /// - `Backend`: service failure
    fn is_held(&self, key: &str, holder_token: Uuid) -> LockFuture<'_, bool>;
}

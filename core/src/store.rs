//! Resource store and claim ledger contracts.
//!
//! # Design
//!
//! The workflow never talks to a store directly. It runs against a
//! [`StoreTransaction`] opened by its controller with a [`LockMode`]:
//!
//! - [`LockMode::None`]: plain reads, writes applied on commit. Used by the
//!   baseline, the in-process mutex, the distributed lease, and the optimistic
//!   strategy (which relies on the versioned update instead of a lock).
//! - [`LockMode::Exclusive`]: [`StoreTransaction::get`] takes an exclusive lock
//!   on the record (`SELECT ... FOR UPDATE`) that is held until the transaction
//!   commits or is dropped.
//!
//! Keeping every read and write on one transaction object is what lets the
//! row-lock strategy work against a real database: a write issued on a
//! different connection would queue behind the very lock this caller holds.
//!
//! Dropping a transaction without committing discards its writes.
//!
//! # Implementations
//!
//! - `InMemoryReservationStore` (in `seatguard-testing`): fast, deterministic tests
//! - `PostgresReservationStore` (in `seatguard-postgres`): production
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` rather than using `async fn` so the
//! store can be shared as `Arc<dyn ReservationStore>` by every controller.

use crate::error::StoreError;
use crate::ids::{ClaimantId, ResourceId, Version};
use crate::model::{Claim, Resource, ResourceStatus};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Isolation requested when opening a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// No record locks.
    None,
    /// Exclusive record lock taken on `get` and held until commit/rollback.
    Exclusive,
}

/// One unit of work against the resource store and the claim ledger.
///
/// # Resource Store operations
///
/// - [`get`](Self::get)
/// - [`compare_and_swap_decrement`](Self::compare_and_swap_decrement)
/// - [`decrement_under_lock`](Self::decrement_under_lock)
///
/// # Claim Ledger operations
///
/// - [`exists`](Self::exists)
/// - [`append`](Self::append)
///
/// Writes become visible to other transactions only after [`commit`](Self::commit).
pub trait StoreTransaction: Send {
    /// Load a resource.
    ///
    /// Under [`LockMode::Exclusive`] this blocks until the record lock is
    /// granted and keeps it for the rest of the transaction.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no such resource
    /// - `Database`: backend failure
    fn get(&mut self, id: ResourceId) -> StoreFuture<'_, Resource>;

    /// Take one unit, conditioned on the stored version still being `expected`.
    ///
    /// Returns the new version.
    ///
    /// # Errors
    ///
    /// - `VersionConflict`: someone else committed a decrement since `expected` was read
    /// - `Constraint`: the stored count is already zero
    /// - `NotFound`, `Database`
    fn compare_and_swap_decrement(
        &mut self,
        id: ResourceId,
        expected: Version,
    ) -> StoreFuture<'_, Version>;

    /// Write back `observed` with one unit taken.
    ///
    /// This is a blind write of the caller's snapshot. It is only correct while
    /// the caller holds exclusivity over the resource (a mutex, a record lock, or
    /// a lease); without it, concurrent writers overwrite each other.
    ///
    /// # Errors
    ///
    /// - `Constraint`: `observed.remaining` is already zero
    /// - `NotFound`, `Database`
    fn decrement_under_lock(&mut self, observed: &Resource) -> StoreFuture<'_, Resource>;

    /// Whether the claimant already holds a committed claim on the resource.
    ///
    /// # Errors
    ///
    /// - `Database`: backend failure
    fn exists(&mut self, resource_id: ResourceId, claimant_id: &ClaimantId)
    -> StoreFuture<'_, bool>;

    /// Append a claim to the ledger.
    ///
    /// # Errors
    ///
    /// - `Database`: backend failure
    fn append(&mut self, claim: &Claim) -> StoreFuture<'_, ()>;

    /// Make every write of this transaction visible atomically and release its locks.
    ///
    /// # Errors
    ///
    /// - `VersionConflict`: a conditional update no longer holds at commit time
    /// - `Database`: backend failure
    fn commit(self: Box<Self>) -> StoreFuture<'static, ()>;

    /// Discard every write and release locks.
    ///
    /// # Errors
    ///
    /// - `Database`: backend failure
    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()>;
}

/// Durable home of resources and their claim ledger.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; every controller shares one store.
pub trait ReservationStore: Send + Sync {
    /// Open a transaction.
    ///
    /// # Errors
    ///
    /// - `Database`: no connection available or backend failure
    fn begin(&self, mode: LockMode) -> StoreFuture<'_, Box<dyn StoreTransaction>>;

    /// Read a resource outside any transaction, for reporting only.
    ///
    /// Never base a write on this value.
    ///
    /// # Errors
    ///
    /// - `NotFound`, `Database`
    fn get(&self, id: ResourceId) -> StoreFuture<'_, Resource>;

    /// Number of committed claims for a resource.
    ///
    /// # Errors
    ///
    /// - `Database`: backend failure
    fn count(&self, id: ResourceId) -> StoreFuture<'_, u64>;

    /// Create a resource with the given stock at [`Version::INITIAL`].
    ///
    /// # Errors
    ///
    /// - `Database`: backend failure
    fn create_resource(&self, name: &str, remaining: u32) -> StoreFuture<'_, Resource>;

    /// Delete every resource and claim. A data-reset operation, not part of the
    /// claim path.
    ///
    /// # Errors
    ///
    /// - `Database`: backend failure
    fn reset(&self) -> StoreFuture<'_, ()>;

    /// Remaining stock and claim count, read without a controller.
    ///
    /// # Errors
    ///
    /// - `NotFound`, `Database`
    fn status(&self, id: ResourceId) -> StoreFuture<'_, ResourceStatus> {
        Box::pin(async move {
            let resource = self.get(id).await?;
            let claim_count = self.count(id).await?;
            Ok(ResourceStatus {
                id: resource.id,
                name: resource.name,
                remaining: resource.remaining,
                claim_count,
            })
        })
    }
}

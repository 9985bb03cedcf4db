//! In-memory resource store and claim ledger.
//!
//! Behaves like a small transactional database:
//!
//! - writes are buffered per transaction and applied atomically on commit
//! - [`LockMode::Exclusive`] takes a per-record lock on `get`, held until the
//!   transaction ends
//! - compare-and-swap decrements are checked when issued and re-validated at
//!   commit, so at most one of several racing transactions commits
//! - an optional pool bound limits concurrently open transactions, the way a
//!   connection pool bounds concurrency against a real database
//!
//! Dropping a transaction without committing discards its writes.

use seatguard_core::store::{LockMode, ReservationStore, StoreFuture, StoreTransaction};
use seatguard_core::{Claim, ClaimantId, Resource, ResourceId, StoreError, Version};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Default)]
struct State {
    resources: HashMap<ResourceId, Resource>,
    claims: Vec<Claim>,
    next_id: i64,
}

type RecordLocks = Mutex<HashMap<ResourceId, Arc<tokio::sync::Mutex<()>>>>;

#[derive(Debug, Default)]
struct Shared {
    state: RwLock<State>,
    record_locks: RecordLocks,
}

impl Shared {
    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> T {
        f(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.write().unwrap_or_else(PoisonError::into_inner))
    }

    fn record_lock(&self, id: ResourceId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .record_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Entries only the registry references are idle.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(id).or_default())
    }

    fn load(&self, id: ResourceId) -> Result<Resource, StoreError> {
        self.read(|state| state.resources.get(&id).cloned())
            .ok_or(StoreError::NotFound(id))
    }
}

/// In-memory implementation of [`ReservationStore`].
///
/// # Example
///
/// ```
/// use seatguard_core::store::{LockMode, ReservationStore};
/// use seatguard_testing::InMemoryReservationStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryReservationStore::new().with_pool_size(10);
/// let resource = store.create_resource("concert", 100).await?;
///
/// let mut tx = store.begin(LockMode::Exclusive).await?;
/// let loaded = tx.get(resource.id).await?;
/// tx.decrement_under_lock(&loaded).await?;
/// tx.commit().await?;
///
/// assert_eq!(store.get(resource.id).await?.remaining, 99);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryReservationStore {
    shared: Arc<Shared>,
    pool: Option<Arc<Semaphore>>,
}

impl InMemoryReservationStore {
    /// Create an empty store with no pool bound.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow at most `size` transactions to be open at once.
    ///
    /// `begin` waits for a free slot, like acquiring a pooled connection.
    #[must_use]
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool = Some(Arc::new(Semaphore::new(size.max(1))));
        self
    }

    /// Every committed claim, in commit order.
    #[must_use]
    pub fn claims(&self) -> Vec<Claim> {
        self.shared.read(|state| state.claims.clone())
    }
}

impl ReservationStore for InMemoryReservationStore {
    fn begin(&self, mode: LockMode) -> StoreFuture<'_, Box<dyn StoreTransaction>> {
        Box::pin(async move {
            let permit = match &self.pool {
                Some(pool) => Some(
                    Arc::clone(pool)
                        .acquire_owned()
                        .await
                        .map_err(|e| StoreError::Database(e.to_string()))?,
                ),
                None => None,
            };

            Ok(Box::new(InMemoryTransaction {
                shared: Arc::clone(&self.shared),
                mode,
                record_guards: HashMap::new(),
                writes: Vec::new(),
                claims: Vec::new(),
                _permit: permit,
            }) as Box<dyn StoreTransaction>)
        })
    }

    fn get(&self, id: ResourceId) -> StoreFuture<'_, Resource> {
        Box::pin(async move { self.shared.load(id) })
    }

    fn count(&self, id: ResourceId) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let count = self.shared.read(|state| {
                state
                    .claims
                    .iter()
                    .filter(|claim| claim.resource_id == id)
                    .count()
            });
            Ok(u64::try_from(count).unwrap_or(u64::MAX))
        })
    }

    fn create_resource(&self, name: &str, remaining: u32) -> StoreFuture<'_, Resource> {
        let name = name.to_string();
        Box::pin(async move {
            Ok(self.shared.write(|state| {
                state.next_id += 1;
                let resource = Resource::new(ResourceId::new(state.next_id), name, remaining);
                state.resources.insert(resource.id, resource.clone());
                resource
            }))
        })
    }

    fn reset(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.shared.write(|state| {
                state.resources.clear();
                state.claims.clear();
            });
            Ok(())
        })
    }
}

#[derive(Debug)]
enum PendingWrite {
    /// Blind overwrite with the caller's snapshot minus one.
    WriteBack(Resource),
    /// Decrement only if the stored version is still `expected`.
    CompareAndSwap { id: ResourceId, expected: Version },
}

struct InMemoryTransaction {
    shared: Arc<Shared>,
    mode: LockMode,
    record_guards: HashMap<ResourceId, OwnedMutexGuard<()>>,
    writes: Vec<PendingWrite>,
    claims: Vec<Claim>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl InMemoryTransaction {
    fn staged_claim(&self, resource_id: ResourceId, claimant_id: &ClaimantId) -> bool {
        self.claims
            .iter()
            .any(|claim| claim.resource_id == resource_id && &claim.claimant_id == claimant_id)
    }

    fn apply(state: &mut State, write: &PendingWrite) -> Result<(), StoreError> {
        match write {
            PendingWrite::WriteBack(next) => {
                let stored = state
                    .resources
                    .get_mut(&next.id)
                    .ok_or(StoreError::NotFound(next.id))?;
                stored.remaining = next.remaining;
                stored.version = next.version;
            }
            PendingWrite::CompareAndSwap { id, expected } => {
                let stored = state
                    .resources
                    .get_mut(id)
                    .ok_or(StoreError::NotFound(*id))?;
                stored.remaining = stored.remaining.checked_sub(1).ok_or_else(|| {
                    StoreError::Constraint(format!("resource {id} remaining would go negative"))
                })?;
                stored.version = expected.next();
            }
        }
        Ok(())
    }

    fn validate(state: &State, write: &PendingWrite) -> Result<(), StoreError> {
        if let PendingWrite::CompareAndSwap { id, expected } = write {
            let stored = state.resources.get(id).ok_or(StoreError::NotFound(*id))?;
            if stored.version != *expected {
                return Err(StoreError::VersionConflict {
                    resource_id: *id,
                    expected: *expected,
                    actual: stored.version,
                });
            }
            if stored.remaining == 0 {
                return Err(StoreError::Constraint(format!(
                    "resource {id} remaining would go negative"
                )));
            }
        }
        Ok(())
    }
}

impl StoreTransaction for InMemoryTransaction {
    fn get(&mut self, id: ResourceId) -> StoreFuture<'_, Resource> {
        Box::pin(async move {
            if self.mode == LockMode::Exclusive && !self.record_guards.contains_key(&id) {
                let guard = self.shared.record_lock(id).lock_owned().await;
                self.record_guards.insert(id, guard);
            }
            self.shared.load(id)
        })
    }

    fn compare_and_swap_decrement(
        &mut self,
        id: ResourceId,
        expected: Version,
    ) -> StoreFuture<'_, Version> {
        Box::pin(async move {
            let write = PendingWrite::CompareAndSwap { id, expected };
            self.shared.read(|state| Self::validate(state, &write))?;
            self.writes.push(write);
            Ok(expected.next())
        })
    }

    fn decrement_under_lock(&mut self, observed: &Resource) -> StoreFuture<'_, Resource> {
        let observed = observed.clone();
        Box::pin(async move {
            let remaining = observed.remaining.checked_sub(1).ok_or_else(|| {
                StoreError::Constraint(format!(
                    "resource {} remaining would go negative",
                    observed.id
                ))
            })?;
            let next = Resource {
                remaining,
                version: observed.version.next(),
                ..observed
            };
            self.writes.push(PendingWrite::WriteBack(next.clone()));
            Ok(next)
        })
    }

    fn exists(
        &mut self,
        resource_id: ResourceId,
        claimant_id: &ClaimantId,
    ) -> StoreFuture<'_, bool> {
        let claimant_id = claimant_id.clone();
        Box::pin(async move {
            let committed = self.shared.read(|state| {
                state.claims.iter().any(|claim| {
                    claim.resource_id == resource_id && claim.claimant_id == claimant_id
                })
            });
            Ok(committed || self.staged_claim(resource_id, &claimant_id))
        })
    }

    fn append(&mut self, claim: &Claim) -> StoreFuture<'_, ()> {
        let claim = claim.clone();
        Box::pin(async move {
            self.claims.push(claim);
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            let tx = *self;
            tx.shared.write(|state| {
                for write in &tx.writes {
                    Self::validate(state, write)?;
                }
                for write in &tx.writes {
                    Self::apply(state, write)?;
                }
                state.claims.extend(tx.claims.iter().cloned());
                Ok(())
            })
            // Record guards and the pool permit drop with `tx`.
        })
    }

    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            drop(self);
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    #[tokio::test]
    async fn create_assigns_fresh_ids_after_reset() {
        let store = InMemoryReservationStore::new();
        let first = store.create_resource("a", 1).await.expect("create");
        store.reset().await.expect("reset");
        let second = store.create_resource("b", 1).await.expect("create");

        assert_ne!(first.id, second.id);
        assert!(matches!(store.get(first.id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let store = InMemoryReservationStore::new();
        let resource = store.create_resource("a", 5).await.expect("create");

        let mut tx = store.begin(LockMode::None).await.expect("begin");
        let loaded = tx.get(resource.id).await.expect("get");
        tx.decrement_under_lock(&loaded).await.expect("decrement");
        tx.append(&Claim::new(resource.id, "u".into(), Utc::now()))
            .await
            .expect("append");

        assert_eq!(store.get(resource.id).await.expect("get").remaining, 5);
        assert_eq!(store.count(resource.id).await.expect("count"), 0);

        tx.commit().await.expect("commit");
        assert_eq!(store.get(resource.id).await.expect("get").remaining, 4);
        assert_eq!(store.count(resource.id).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn second_compare_and_swap_on_same_version_conflicts_at_commit() {
        let store = InMemoryReservationStore::new();
        let resource = store.create_resource("a", 5).await.expect("create");

        let mut first = store.begin(LockMode::None).await.expect("begin");
        let mut second = store.begin(LockMode::None).await.expect("begin");
        first
            .compare_and_swap_decrement(resource.id, Version::INITIAL)
            .await
            .expect("first cas");
        second
            .compare_and_swap_decrement(resource.id, Version::INITIAL)
            .await
            .expect("second cas staged before first commits");

        first.commit().await.expect("first commit");
        let conflict = second.commit().await;

        assert!(matches!(conflict, Err(StoreError::VersionConflict { .. })));
        let stored = store.get(resource.id).await.expect("get");
        assert_eq!(stored.remaining, 4);
        assert_eq!(stored.version, Version::new(1));
    }

    #[tokio::test]
    async fn stale_compare_and_swap_fails_immediately() {
        let store = InMemoryReservationStore::new();
        let resource = store.create_resource("a", 5).await.expect("create");

        let mut tx = store.begin(LockMode::None).await.expect("begin");
        tx.compare_and_swap_decrement(resource.id, Version::INITIAL)
            .await
            .expect("cas");
        tx.commit().await.expect("commit");

        let mut stale = store.begin(LockMode::None).await.expect("begin");
        let result = stale
            .compare_and_swap_decrement(resource.id, Version::INITIAL)
            .await;
        assert!(matches!(
            result,
            Err(StoreError::VersionConflict { actual, .. }) if actual == Version::new(1)
        ));
    }

    #[tokio::test]
    async fn exclusive_get_blocks_until_holder_ends() {
        let store = InMemoryReservationStore::new();
        let id = store.create_resource("a", 5).await.expect("create").id;

        let mut holder = store.begin(LockMode::Exclusive).await.expect("begin");
        holder.get(id).await.expect("get");

        let waiter_store = store.clone();
        let waiter = tokio::spawn(async move {
            let mut tx = waiter_store
                .begin(LockMode::Exclusive)
                .await
                .expect("begin");
            tx.get(id).await.expect("get").remaining
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let loaded = store.get(id).await.expect("get");
        holder.decrement_under_lock(&loaded).await.expect("decrement");
        holder.commit().await.expect("commit");

        let seen = waiter.await.expect("join");
        assert_eq!(seen, 4);
    }

    #[tokio::test]
    async fn idle_record_locks_are_pruned() {
        let store = InMemoryReservationStore::new();
        let mut ids = Vec::new();
        for _ in 0..20 {
            ids.push(store.create_resource("a", 1).await.expect("create").id);
        }

        let mut holder = store.begin(LockMode::Exclusive).await.expect("begin");
        holder.get(ids[0]).await.expect("get");
        for id in &ids[1..] {
            let mut tx = store.begin(LockMode::Exclusive).await.expect("begin");
            tx.get(*id).await.expect("get");
            tx.rollback().await.expect("rollback");
        }

        let tracked = store
            .shared
            .record_locks
            .lock()
            .expect("registry")
            .len();
        assert_eq!(tracked, 2);
        holder.rollback().await.expect("rollback");
    }

    #[tokio::test]
    async fn pool_bounds_open_transactions() {
        let store = InMemoryReservationStore::new().with_pool_size(1);
        let open = store.begin(LockMode::None).await.expect("begin");

        let blocked = tokio::time::timeout(Duration::from_millis(20), store.begin(LockMode::None)).await;
        assert!(blocked.is_err());

        open.rollback().await.expect("rollback");
        let next = tokio::time::timeout(Duration::from_millis(200), store.begin(LockMode::None)).await;
        assert!(matches!(next, Ok(Ok(_))));
    }

    #[tokio::test]
    async fn staged_claims_are_visible_to_their_own_transaction() {
        let store = InMemoryReservationStore::new();
        let resource = store.create_resource("a", 5).await.expect("create");
        let claimant = ClaimantId::new("u");

        let mut tx = store.begin(LockMode::None).await.expect("begin");
        tx.append(&Claim::new(resource.id, claimant.clone(), Utc::now()))
            .await
            .expect("append");

        assert!(tx.exists(resource.id, &claimant).await.expect("exists"));
        drop(tx);
        assert_eq!(store.count(resource.id).await.expect("count"), 0);
    }
}

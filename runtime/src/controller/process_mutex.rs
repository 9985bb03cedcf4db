use super::{ClaimFuture, ConcurrencyController};
use crate::workflow::{DecrementMode, ReservationWorkflow};
use seatguard_core::store::LockMode;
use seatguard_core::{ClaimError, ClaimRequest, ResourceId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Granularity of the in-process lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutexScope {
    /// One lock per resource; claims on different resources run in parallel.
    #[default]
    PerResource,
    /// A single lock for every resource.
    Global,
}

/// In-process mutual exclusion around the whole critical section.
///
/// The lock is held across begin, workflow, and commit, so the next caller
/// always reads committed state. It protects nothing across processes.
#[derive(Debug, Default)]
pub struct ProcessMutexController {
    scope: MutexScope,
    global: Arc<tokio::sync::Mutex<()>>,
    per_resource: Mutex<HashMap<ResourceId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProcessMutexController {
    /// Create a controller with the given lock scope.
    #[must_use]
    pub fn new(scope: MutexScope) -> Self {
        Self {
            scope,
            ..Self::default()
        }
    }

    /// The configured lock scope.
    #[must_use]
    pub const fn scope(&self) -> MutexScope {
        self.scope
    }

    fn lock_for(&self, id: ResourceId) -> Result<Arc<tokio::sync::Mutex<()>>, ClaimError> {
        match self.scope {
            MutexScope::Global => Ok(Arc::clone(&self.global)),
            MutexScope::PerResource => {
                let mut locks = self.per_resource.lock().map_err(|_| {
                    ClaimError::InvariantViolation("process mutex registry poisoned".to_string())
                })?;
                // Entries only the registry references are idle.
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
                Ok(Arc::clone(locks.entry(id).or_default()))
            }
        }
    }
}

impl ConcurrencyController for ProcessMutexController {
    fn name(&self) -> &'static str {
        "process_mutex"
    }

    fn protect<'a>(
        &'a self,
        workflow: &'a ReservationWorkflow,
        request: &'a ClaimRequest,
    ) -> ClaimFuture<'a> {
        Box::pin(async move {
            let lock = self.lock_for(request.resource_id)?;
            let _guard = lock.lock().await;
            workflow
                .execute(LockMode::None, DecrementMode::WriteBack, request)
                .await
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn per_resource_scope_shares_lock_for_same_resource() {
        let controller = ProcessMutexController::new(MutexScope::PerResource);
        let a = controller.lock_for(ResourceId::new(1)).expect("lock");
        let b = controller.lock_for(ResourceId::new(1)).expect("lock");
        let c = controller.lock_for(ResourceId::new(2)).expect("lock");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn idle_resource_locks_are_pruned() {
        let controller = ProcessMutexController::new(MutexScope::PerResource);
        let held = controller.lock_for(ResourceId::new(1)).expect("lock");
        for id in 2..50 {
            drop(controller.lock_for(ResourceId::new(id)).expect("lock"));
        }

        let tracked = controller.per_resource.lock().expect("registry").len();
        assert_eq!(tracked, 2);

        let again = controller.lock_for(ResourceId::new(1)).expect("lock");
        assert!(Arc::ptr_eq(&held, &again));
    }

    #[test]
    fn global_scope_uses_one_lock() {
        let controller = ProcessMutexController::new(MutexScope::Global);
        let a = controller.lock_for(ResourceId::new(1)).expect("lock");
        let b = controller.lock_for(ResourceId::new(2)).expect("lock");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(controller.scope(), MutexScope::Global);
    }
}

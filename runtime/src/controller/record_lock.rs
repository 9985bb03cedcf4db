use super::{ClaimFuture, ConcurrencyController};
use crate::workflow::{DecrementMode, ReservationWorkflow};
use seatguard_core::ClaimRequest;
use seatguard_core::store::LockMode;

/// Exclusive record lock held by the store for the whole transaction.
///
/// The workflow's first read takes the lock (`SELECT ... FOR UPDATE` on
/// PostgreSQL); every other caller on the same resource queues behind it until
/// commit or rollback. Works across processes that share the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordLockController;

impl RecordLockController {
    /// Create the record-lock controller.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ConcurrencyController for RecordLockController {
    fn name(&self) -> &'static str {
        "record_lock"
    }

    fn protect<'a>(
        &'a self,
        workflow: &'a ReservationWorkflow,
        request: &'a ClaimRequest,
    ) -> ClaimFuture<'a> {
        Box::pin(workflow.execute(LockMode::Exclusive, DecrementMode::WriteBack, request))
    }
}

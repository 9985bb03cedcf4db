use super::{ClaimFuture, ConcurrencyController};
use crate::workflow::{DecrementMode, ReservationWorkflow};
use seatguard_core::ClaimRequest;
use seatguard_core::store::LockMode;

/// Baseline with no synchronization at all.
///
/// Each call reads the record, waits out the processing delay, and writes its
/// own snapshot back. Concurrent callers overwrite each other's decrements, so
/// `remaining` ends too high while every caller records a claim. Kept to
/// demonstrate the race the other strategies close.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsynchronizedController;

impl UnsynchronizedController {
    /// Create the baseline controller.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ConcurrencyController for UnsynchronizedController {
    fn name(&self) -> &'static str {
        "unsynchronized"
    }

    fn prevents_oversell(&self) -> bool {
        false
    }

    fn protect<'a>(
        &'a self,
        workflow: &'a ReservationWorkflow,
        request: &'a ClaimRequest,
    ) -> ClaimFuture<'a> {
        Box::pin(workflow.execute(LockMode::None, DecrementMode::WriteBack, request))
    }
}

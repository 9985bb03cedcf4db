//! Concurrency-control strategies.
//!
//! Every strategy implements [`ConcurrencyController`]: given a claim request,
//! run the [`ReservationWorkflow`] so that its decrement and ledger write are
//! atomic with respect to the reads before them, as seen by every other
//! invocation on the same resource.
//!
//! | Strategy | Domain | Contention behaviour |
//! |---|---|---|
//! | [`UnsynchronizedController`] | none | silently loses updates |
//! | [`ProcessMutexController`] | one process | callers block |
//! | [`RecordLockController`] | shared store | callers block on the record lock |
//! | [`OptimisticController`] | shared store | conflicts retried, then `RetryExhausted` |
//! | [`LeaseController`] | any processes | `LockTimeout` after the wait time |

use crate::workflow::ReservationWorkflow;
use seatguard_core::{ClaimError, ClaimRequest, Claimed};
use std::future::Future;
use std::pin::Pin;

mod lease;
mod optimistic;
mod process_mutex;
mod record_lock;
mod unsynchronized;

pub use lease::{LeaseConfig, LeaseController};
pub use optimistic::OptimisticController;
pub use process_mutex::{MutexScope, ProcessMutexController};
pub use record_lock::RecordLockController;
pub use unsynchronized::UnsynchronizedController;

/// Boxed future returned by [`ConcurrencyController::protect`].
pub type ClaimFuture<'a> = Pin<Box<dyn Future<Output = Result<Claimed, ClaimError>> + Send + 'a>>;

/// A strategy that makes the workflow safe under concurrent execution.
///
/// # Dyn Compatibility
///
/// `protect` returns a boxed future so that controllers can be selected at run
/// time and shared as `Arc<dyn ConcurrencyController>`.
pub trait ConcurrencyController: Send + Sync {
    /// Short identifier used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Whether concurrent claims through this controller can never oversell.
    ///
    /// Only the baseline returns `false`.
    fn prevents_oversell(&self) -> bool {
        true
    }

    /// Run the workflow for `request` under this strategy's protection.
    ///
    /// # Errors
    ///
    /// The workflow's own errors, plus the strategy's contention failures
    /// (`RetryExhausted`, `LockTimeout`, `AcquisitionInterrupted`, `LeaseLost`).
    fn protect<'a>(
        &'a self,
        workflow: &'a ReservationWorkflow,
        request: &'a ClaimRequest,
    ) -> ClaimFuture<'a>;
}

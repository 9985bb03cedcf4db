use super::{ClaimFuture, ConcurrencyController};
use crate::metrics::ClaimMetrics;
use crate::retry::{RetryError, RetryPolicy, retry_with_predicate};
use crate::workflow::{DecrementMode, ReservationWorkflow};
use seatguard_core::store::LockMode;
use seatguard_core::{ClaimError, ClaimRequest};
use tracing::warn;

/// Optimistic versioning with bounded retry.
///
/// Each attempt runs the full workflow in a fresh transaction and decrements
/// with a compare-and-swap on the version it read. A lost race surfaces as
/// `VersionConflict` and the attempt is re-run from the top after a jittered
/// backoff. Business outcomes are never retried.
///
/// At most `policy.max_retries + 1` attempts are made; running out yields
/// `RetryExhausted` rather than blocking.
#[derive(Debug, Clone, Default)]
pub struct OptimisticController {
    policy: RetryPolicy,
}

impl OptimisticController {
    /// Create a controller with the given retry policy.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The retry policy in use.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl ConcurrencyController for OptimisticController {
    fn name(&self) -> &'static str {
        "optimistic"
    }

    fn protect<'a>(
        &'a self,
        workflow: &'a ReservationWorkflow,
        request: &'a ClaimRequest,
    ) -> ClaimFuture<'a> {
        Box::pin(async move {
            let outcome = retry_with_predicate(
                &self.policy,
                |attempt| async move {
                    let result = workflow
                        .execute(LockMode::None, DecrementMode::CompareAndSwap, request)
                        .await;
                    if matches!(&result, Err(err) if err.is_retryable()) {
                        ClaimMetrics::record_retry();
                        warn!(
                            resource_id = %request.resource_id,
                            claimant_id = %request.claimant_id,
                            attempt,
                            "Version conflict"
                        );
                    }
                    result
                },
                ClaimError::is_retryable,
            )
            .await;

            outcome.map_err(|err| match err {
                RetryError::Permanent(err) => err,
                RetryError::Exhausted { attempts, .. } => {
                    ClaimMetrics::record_exhausted();
                    ClaimError::RetryExhausted {
                        resource_id: request.resource_id,
                        attempts,
                    }
                }
            })
        })
    }
}

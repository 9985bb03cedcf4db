//! The reservation workflow.
//!
//! One claim attempt is a fixed sequence run against a single
//! [`StoreTransaction`]:
//!
//! 1. load the resource (`NotFound` if absent)
//! 2. with duplicate prevention on, check the ledger (`DuplicateClaim`)
//! 3. check availability (`OutOfStock`)
//! 4. simulate processing cost
//! 5. decrement by one
//! 6. append the claim
//!
//! The workflow is identical under every strategy. It provides no isolation of
//! its own; a [`ConcurrencyController`](crate::controller::ConcurrencyController)
//! chooses the transaction's [`LockMode`], the [`DecrementMode`], and whatever
//! lock surrounds the call.

use seatguard_core::environment::Clock;
use seatguard_core::store::{LockMode, ReservationStore, StoreTransaction};
use seatguard_core::{Claim, ClaimError, ClaimRequest, Claimed};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Workflow settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Reject a second claim by the same claimant on the same resource
    pub prevent_duplicates: bool,
    /// Constant delay between the availability check and the decrement
    ///
    /// Zero in production. Tests set it to widen the race window.
    pub processing_delay: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            prevent_duplicates: true,
            processing_delay: Duration::ZERO,
        }
    }
}

impl WorkflowConfig {
    /// Enable or disable duplicate prevention.
    #[must_use]
    pub const fn with_duplicate_prevention(mut self, enabled: bool) -> Self {
        self.prevent_duplicates = enabled;
        self
    }

    /// Set the simulated processing delay.
    #[must_use]
    pub const fn with_processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = delay;
        self
    }
}

/// How step 5 takes the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementMode {
    /// Write back the loaded record minus one. Only correct under exclusivity.
    WriteBack,
    /// Conditional update on the loaded version; a lost race is `VersionConflict`.
    CompareAndSwap,
}

/// Runs the claim sequence. Invoked only by controllers.
pub struct ReservationWorkflow {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    config: WorkflowConfig,
}

impl ReservationWorkflow {
    /// Create a workflow over a store.
    #[must_use]
    pub fn new(
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// The store this workflow writes to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ReservationStore> {
        &self.store
    }

    /// The clock used to stamp claims.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current settings.
    #[must_use]
    pub const fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Run steps 1-6 on an open transaction. The caller commits or rolls back.
    ///
    /// # Errors
    ///
    /// - `NotFound`, `DuplicateClaim`, `OutOfStock`: business outcomes
    /// - `VersionConflict`: the compare-and-swap lost a race
    /// - `InvariantViolation`: a decrement below zero was attempted
    /// - `Store`: backend failure
    pub async fn run(
        &self,
        tx: &mut dyn StoreTransaction,
        request: &ClaimRequest,
        decrement: DecrementMode,
    ) -> Result<Claimed, ClaimError> {
        let result = self.run_steps(tx, request, decrement).await;

        if let Err(ClaimError::InvariantViolation(reason)) = &result {
            error!(
                resource_id = %request.resource_id,
                claimant_id = %request.claimant_id,
                reason = %reason,
                "Invariant violated while claiming"
            );
        }

        result
    }

    async fn run_steps(
        &self,
        tx: &mut dyn StoreTransaction,
        request: &ClaimRequest,
        decrement: DecrementMode,
    ) -> Result<Claimed, ClaimError> {
        let resource_id = request.resource_id;
        let resource = tx.get(resource_id).await?;

        if self.config.prevent_duplicates && tx.exists(resource_id, &request.claimant_id).await? {
            return Err(ClaimError::DuplicateClaim {
                resource_id,
                claimant_id: request.claimant_id.clone(),
            });
        }

        if !resource.has_stock() {
            return Err(ClaimError::OutOfStock(resource_id));
        }

        if !self.config.processing_delay.is_zero() {
            tokio::time::sleep(self.config.processing_delay).await;
        }

        let expected = resource.decremented()?;
        let remaining_after = match decrement {
            DecrementMode::WriteBack => tx.decrement_under_lock(&resource).await?.remaining,
            DecrementMode::CompareAndSwap => {
                tx.compare_and_swap_decrement(resource_id, resource.version)
                    .await?;
                expected.remaining
            }
        };

        let claim = Claim::new(resource_id, request.claimant_id.clone(), self.clock.now());
        tx.append(&claim).await?;

        debug!(
            resource_id = %resource_id,
            claimant_id = %request.claimant_id,
            remaining = remaining_after,
            "Claim staged"
        );

        Ok(Claimed {
            claim,
            remaining_after,
        })
    }

    /// Open a transaction, run the workflow, and commit on success.
    ///
    /// Any failure rolls the transaction back. A commit that fails (for example
    /// a compare-and-swap invalidated at commit time) is reported as the
    /// corresponding [`ClaimError`].
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run), plus commit failures.
    pub async fn execute(
        &self,
        mode: LockMode,
        decrement: DecrementMode,
        request: &ClaimRequest,
    ) -> Result<Claimed, ClaimError> {
        let mut tx = self.store.begin(mode).await?;

        match self.run(tx.as_mut(), request, decrement).await {
            Ok(claimed) => {
                tx.commit().await?;
                Ok(claimed)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(
                        resource_id = %request.resource_id,
                        error = %rollback,
                        "Rollback failed"
                    );
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use seatguard_core::{ResourceId, Version};
    use seatguard_testing::{InMemoryReservationStore, test_clock};

    async fn workflow_with(stock: u32, config: WorkflowConfig) -> (ReservationWorkflow, ResourceId) {
        let store = Arc::new(InMemoryReservationStore::new());
        let resource = store
            .create_resource("concert", stock)
            .await
            .expect("create resource");
        let workflow = ReservationWorkflow::new(store, Arc::new(test_clock()), config);
        (workflow, resource.id)
    }

    #[tokio::test]
    async fn claim_decrements_and_records() {
        let (workflow, id) = workflow_with(2, WorkflowConfig::default()).await;

        let claimed = workflow
            .execute(LockMode::None, DecrementMode::WriteBack, &ClaimRequest::new(id, "a"))
            .await
            .expect("claim succeeds");

        assert_eq!(claimed.remaining_after, 1);
        assert_eq!(claimed.claim.claimed_at, test_clock().now());

        let status = workflow.store().status(id).await.expect("status");
        assert_eq!(status.remaining, 1);
        assert_eq!(status.claim_count, 1);
    }

    #[tokio::test]
    async fn compare_and_swap_bumps_version() {
        let (workflow, id) = workflow_with(3, WorkflowConfig::default()).await;

        workflow
            .execute(
                LockMode::None,
                DecrementMode::CompareAndSwap,
                &ClaimRequest::new(id, "a"),
            )
            .await
            .expect("claim succeeds");

        let resource = workflow.store().get(id).await.expect("get");
        assert_eq!(resource.remaining, 2);
        assert_eq!(resource.version, Version::new(1));
    }

    #[tokio::test]
    async fn unknown_resource_is_not_found() {
        let (workflow, _) = workflow_with(1, WorkflowConfig::default()).await;
        let missing = ResourceId::new(999);

        let result = workflow
            .execute(
                LockMode::None,
                DecrementMode::WriteBack,
                &ClaimRequest::new(missing, "a"),
            )
            .await;

        assert!(matches!(result, Err(ClaimError::NotFound(id)) if id == missing));
    }

    #[tokio::test]
    async fn empty_resource_is_out_of_stock_and_unchanged() {
        let (workflow, id) = workflow_with(0, WorkflowConfig::default()).await;

        let result = workflow
            .execute(LockMode::None, DecrementMode::WriteBack, &ClaimRequest::new(id, "a"))
            .await;

        assert!(matches!(result, Err(ClaimError::OutOfStock(_))));
        let status = workflow.store().status(id).await.expect("status");
        assert_eq!(status.remaining, 0);
        assert_eq!(status.claim_count, 0);
    }

    #[tokio::test]
    async fn duplicate_is_checked_before_stock() {
        let (workflow, id) = workflow_with(1, WorkflowConfig::default()).await;
        let request = ClaimRequest::new(id, "a");

        workflow
            .execute(LockMode::None, DecrementMode::WriteBack, &request)
            .await
            .expect("first claim");

        // Stock is now zero, yet the repeat is reported as a duplicate.
        let second = workflow
            .execute(LockMode::None, DecrementMode::WriteBack, &request)
            .await;
        assert!(matches!(second, Err(ClaimError::DuplicateClaim { .. })));
    }

    #[tokio::test]
    async fn duplicates_allowed_when_prevention_is_off() {
        let config = WorkflowConfig::default().with_duplicate_prevention(false);
        let (workflow, id) = workflow_with(2, config).await;
        let request = ClaimRequest::new(id, "a");

        for _ in 0..2 {
            workflow
                .execute(LockMode::None, DecrementMode::WriteBack, &request)
                .await
                .expect("claim succeeds");
        }

        let status = workflow.store().status(id).await.expect("status");
        assert_eq!(status.claim_count, 2);
        assert_eq!(status.remaining, 0);
    }

    #[tokio::test]
    async fn failed_attempt_leaves_no_partial_writes() {
        let (workflow, id) = workflow_with(1, WorkflowConfig::default()).await;

        let mut tx = workflow.store().begin(LockMode::None).await.expect("begin");
        let claimed = workflow
            .run(tx.as_mut(), &ClaimRequest::new(id, "a"), DecrementMode::WriteBack)
            .await
            .expect("run");
        assert_eq!(claimed.remaining_after, 0);
        tx.rollback().await.expect("rollback");

        let status = workflow.store().status(id).await.expect("status");
        assert_eq!(status.remaining, 1);
        assert_eq!(status.claim_count, 0);
    }
}

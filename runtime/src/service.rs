//! Reservation service: the orchestrator callers talk to.
//!
//! The service never runs the workflow itself. Every claim crosses the
//! controller boundary, so the protection a strategy provides cannot be
//! bypassed by calling the workflow from inside the same object.

use crate::controller::ConcurrencyController;
use crate::metrics::ClaimMetrics;
use crate::workflow::ReservationWorkflow;
use seatguard_core::{
    ClaimError, ClaimRequest, Claimed, ErrorClass, Resource, ResourceId, ResourceStatus,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Claims resources under one concurrency-control strategy.
#[derive(Clone)]
pub struct ReservationService {
    workflow: Arc<ReservationWorkflow>,
    controller: Arc<dyn ConcurrencyController>,
}

impl ReservationService {
    /// Create a service that routes every claim through `controller`.
    #[must_use]
    pub fn new(
        workflow: Arc<ReservationWorkflow>,
        controller: Arc<dyn ConcurrencyController>,
    ) -> Self {
        Self {
            workflow,
            controller,
        }
    }

    /// The strategy in use.
    #[must_use]
    pub fn controller(&self) -> &Arc<dyn ConcurrencyController> {
        &self.controller
    }

    /// The workflow behind the controller.
    #[must_use]
    pub fn workflow(&self) -> &Arc<ReservationWorkflow> {
        &self.workflow
    }

    /// Claim one unit of a resource.
    ///
    /// # Errors
    ///
    /// Any [`ClaimError`]; use [`ClaimError::class`] to decide whether the
    /// caller may try again.
    pub async fn claim(&self, request: ClaimRequest) -> Result<Claimed, ClaimError> {
        let strategy = self.controller.name();
        let started = Instant::now();

        let result = self.controller.protect(&self.workflow, &request).await;

        ClaimMetrics::record_outcome(strategy, &result, started.elapsed());
        match &result {
            Ok(claimed) => info!(
                strategy,
                resource_id = %request.resource_id,
                claimant_id = %request.claimant_id,
                remaining = claimed.remaining_after,
                "Claim accepted"
            ),
            Err(err) => match err.class() {
                ErrorClass::Business | ErrorClass::CallerRetryable | ErrorClass::Retryable => {
                    warn!(
                        strategy,
                        resource_id = %request.resource_id,
                        claimant_id = %request.claimant_id,
                        reason = err.kind(),
                        "Claim rejected"
                    );
                }
                ErrorClass::Failure => error!(
                    strategy,
                    resource_id = %request.resource_id,
                    claimant_id = %request.claimant_id,
                    error = %err,
                    "Claim failed"
                ),
            },
        }

        result
    }

    /// Remaining stock and claim count. Needs no controller.
    ///
    /// # Errors
    ///
    /// `NotFound` or a store failure.
    pub async fn status(&self, id: ResourceId) -> Result<ResourceStatus, ClaimError> {
        Ok(self.workflow.store().status(id).await?)
    }

    /// Create a resource with the given stock.
    ///
    /// # Errors
    ///
    /// A store failure.
    pub async fn create_resource(&self, name: &str, stock: u32) -> Result<Resource, ClaimError> {
        let resource = self.workflow.store().create_resource(name, stock).await?;
        info!(resource_id = %resource.id, name, stock, "Resource created");
        Ok(resource)
    }

    /// Delete every resource and claim.
    ///
    /// # Errors
    ///
    /// A store failure.
    pub async fn reset(&self) -> Result<(), ClaimError> {
        self.workflow.store().reset().await?;
        info!("Store reset");
        Ok(())
    }
}

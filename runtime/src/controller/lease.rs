use super::{ClaimFuture, ConcurrencyController};
use crate::error::ConfigError;
use crate::metrics::ClaimMetrics;
use crate::workflow::{DecrementMode, ReservationWorkflow, WorkflowConfig};
use seatguard_core::lock::{LockService, ReleaseOutcome};
use seatguard_core::store::LockMode;
use seatguard_core::{ClaimError, ClaimRequest, Claimed, LeaseRequest, LockError, LockLease};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// Lease timings for [`LeaseController`].
///
/// # Default Values
///
/// - `wait_time`: 5 seconds
/// - `lease_time`: 10 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseConfig {
    /// How long to wait for the lease before `LockTimeout`
    pub wait_time: Duration,
    /// How long a lease lives before it self-expires
    pub lease_time: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            wait_time: Duration::from_secs(5),
            lease_time: Duration::from_secs(10),
        }
    }
}

impl LeaseConfig {
    /// Create a lease configuration.
    #[must_use]
    pub const fn new(wait_time: Duration, lease_time: Duration) -> Self {
        Self {
            wait_time,
            lease_time,
        }
    }

    /// Check the configuration against the critical section it will guard.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ZeroWaitTime`]
    /// - [`ConfigError::LeaseTooShort`] unless `lease_time` exceeds the
    ///   workflow's processing delay
    pub fn validate(&self, workflow: &WorkflowConfig) -> Result<(), ConfigError> {
        if self.wait_time.is_zero() {
            return Err(ConfigError::ZeroWaitTime);
        }
        if self.lease_time <= workflow.processing_delay {
            return Err(ConfigError::LeaseTooShort {
                lease_time: self.lease_time,
                processing_delay: workflow.processing_delay,
            });
        }
        Ok(())
    }
}

/// Distributed lease lock from an external coordination service.
///
/// Per call:
///
/// 1. choose a holder token and wait up to `wait_time` for the lease
/// 2. run the workflow in a plain transaction
/// 3. confirm the lease is still held, then commit
/// 4. release the lease by token, on every exit path
///
/// A lease found expired at step 3 rolls the transaction back and fails with
/// `LeaseLost`: another holder may already be inside the critical section.
/// The check and the commit are separate calls, so `lease_time` must cover the
/// processing delay plus commit latency.
/// An interrupt while waiting releases anything the wait may have obtained and
/// fails with `AcquisitionInterrupted`.
pub struct LeaseController {
    locks: Arc<dyn LockService>,
    config: LeaseConfig,
    interrupt: Option<watch::Receiver<bool>>,
}

impl LeaseController {
    /// Create a lease controller for a workflow with the given settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the lease could expire before the workflow's
    /// processing delay has elapsed.
    pub fn new(
        locks: Arc<dyn LockService>,
        config: LeaseConfig,
        workflow: &WorkflowConfig,
    ) -> Result<Self, ConfigError> {
        config.validate(workflow)?;
        Ok(Self {
            locks,
            config,
            interrupt: None,
        })
    }

    /// Abort pending lease waits once `signal` turns `true`.
    #[must_use]
    pub fn with_interrupt(mut self, signal: watch::Receiver<bool>) -> Self {
        self.interrupt = Some(signal);
        self
    }

    /// The lease timings in use.
    #[must_use]
    pub const fn config(&self) -> &LeaseConfig {
        &self.config
    }

    async fn acquire(&self, request: &ClaimRequest) -> Result<LockLease, ClaimError> {
        let resource_id = request.resource_id;
        let lease_request = LeaseRequest::new(
            resource_id.lock_key(),
            self.config.wait_time,
            self.config.lease_time,
        );
        let key = lease_request.key.clone();
        let token = lease_request.holder_token;

        let acquired = match self.interrupt.clone() {
            None => self.locks.acquire(lease_request).await,
            Some(interrupt) => {
                tokio::select! {
                    acquired = self.locks.acquire(lease_request) => acquired,
                    () = interrupted(interrupt) => Err(LockError::Interrupted(key.clone())),
                }
            }
        };

        match acquired {
            Ok(lease) => Ok(lease),
            Err(LockError::Timeout { waited, .. }) => {
                ClaimMetrics::record_lock_timeout();
                warn!(resource_id = %resource_id, ?waited, "Lease wait timed out");
                Err(ClaimError::LockTimeout {
                    resource_id,
                    waited,
                })
            }
            Err(LockError::Interrupted(_)) => {
                // The wait may have been cut short after the service granted it.
                if let Err(err) = self.locks.release(&key, token).await {
                    warn!(resource_id = %resource_id, error = %err, "Release after interrupt failed");
                }
                warn!(resource_id = %resource_id, "Lease wait interrupted");
                Err(ClaimError::AcquisitionInterrupted(resource_id))
            }
            Err(other) => Err(ClaimError::Lock(other)),
        }
    }

    async fn critical_section(
        &self,
        workflow: &ReservationWorkflow,
        request: &ClaimRequest,
        lease: &LockLease,
    ) -> Result<Claimed, ClaimError> {
        let mut tx = workflow.store().begin(LockMode::None).await?;

        let staged = workflow
            .run(tx.as_mut(), request, DecrementMode::WriteBack)
            .await;
        let held = match &staged {
            Ok(_) => self.locks.is_held(&lease.key, lease.holder_token).await,
            Err(_) => Ok(true),
        };

        match (staged, held) {
            (Ok(claimed), Ok(true)) => {
                tx.commit().await?;
                Ok(claimed)
            }
            (staged, held) => {
                if let Err(err) = tx.rollback().await {
                    warn!(resource_id = %request.resource_id, error = %err, "Rollback failed");
                }
                match held {
                    Ok(true) => staged,
                    Ok(false) => {
                        ClaimMetrics::record_lease_lost();
                        error!(
                            resource_id = %request.resource_id,
                            claimant_id = %request.claimant_id,
                            lease_time = ?self.config.lease_time,
                            "Lease expired inside the critical section"
                        );
                        Err(ClaimError::LeaseLost(request.resource_id))
                    }
                    Err(err) => Err(ClaimError::Lock(err)),
                }
            }
        }
    }
}

async fn release(locks: &dyn LockService, lease: &LockLease) {
    match locks.release(&lease.key, lease.holder_token).await {
        Ok(ReleaseOutcome::Released) => debug!(key = %lease.key, "Lease released"),
        Ok(ReleaseOutcome::AlreadyExpired) => {
            warn!(key = %lease.key, "Lease had already expired at release");
        }
        Err(err) => error!(key = %lease.key, error = %err, "Lease release failed"),
    }
}

/// Releases a held lease if the claim future is dropped or unwinds before
/// the awaited release runs.
struct LeaseGuard {
    locks: Arc<dyn LockService>,
    lease: Option<LockLease>,
}

impl LeaseGuard {
    fn new(locks: Arc<dyn LockService>, lease: LockLease) -> Self {
        Self {
            locks,
            lease: Some(lease),
        }
    }

    /// Release the lease, then disarm the guard.
    async fn release(mut self) {
        if let Some(lease) = &self.lease {
            release(self.locks.as_ref(), lease).await;
        }
        self.lease = None;
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        warn!(key = %lease.key, "Claim abandoned while holding its lease");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let locks = Arc::clone(&self.locks);
                handle.spawn(async move { release(locks.as_ref(), &lease).await });
            }
            Err(_) => error!(key = %lease.key, "No runtime to release lease; it will expire"),
        }
    }
}

/// Resolves once the signal turns `true`; never resolves if its sender is gone.
async fn interrupted(mut signal: watch::Receiver<bool>) {
    let closed = signal.wait_for(|interrupted| *interrupted).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

impl ConcurrencyController for LeaseController {
    fn name(&self) -> &'static str {
        "lease"
    }

    fn protect<'a>(
        &'a self,
        workflow: &'a ReservationWorkflow,
        request: &'a ClaimRequest,
    ) -> ClaimFuture<'a> {
        Box::pin(async move {
            let lease = self.acquire(request).await?;
            let guard = LeaseGuard::new(Arc::clone(&self.locks), lease.clone());
            let result = self.critical_section(workflow, request, &lease).await;
            guard.release().await;
            result
        })
    }
}

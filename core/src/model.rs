//! Domain records: resources, claims, and the requests that produce them.

use crate::error::ClaimError;
use crate::ids::{ClaimantId, ResourceId, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A countable, contended asset (for example the remaining stock of a ticket).
///
/// `remaining` is unsigned, so it can never be observed negative. The only
/// sanctioned way to reduce it is [`Resource::decremented`], which refuses to
/// go below zero instead of saturating.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Store-assigned identifier
    pub id: ResourceId,
    /// Display name
    pub name: String,
    /// Units still available
    pub remaining: u32,
    /// Bumped exactly once per successful decrement
    pub version: Version,
}

impl Resource {
    /// Create a resource record at the initial version.
    #[must_use]
    pub fn new(id: ResourceId, name: impl Into<String>, remaining: u32) -> Self {
        Self {
            id,
            name: name.into(),
            remaining,
            version: Version::INITIAL,
        }
    }

    /// Whether at least one unit is still available.
    #[must_use]
    pub const fn has_stock(&self) -> bool {
        self.remaining > 0
    }

    /// The record as it looks after one unit has been taken.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError::InvariantViolation`] if `remaining` is already zero.
    /// Reaching this inside a correctly held critical section is a logic bug:
    /// the availability check must have rejected the claim first.
    pub fn decremented(&self) -> Result<Self, ClaimError> {
        let remaining = self.remaining.checked_sub(1).ok_or_else(|| {
            ClaimError::InvariantViolation(format!(
                "decrement of resource {} would take remaining below zero",
                self.id
            ))
        })?;

        Ok(Self {
            id: self.id,
            name: self.name.clone(),
            remaining,
            version: self.version.next(),
        })
    }
}

/// One accepted reservation. Immutable once recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Resource the claim was made against
    pub resource_id: ResourceId,
    /// Who made it
    pub claimant_id: ClaimantId,
    /// When the claim was recorded
    pub claimed_at: DateTime<Utc>,
}

impl Claim {
    /// Create a new claim record.
    #[must_use]
    pub const fn new(
        resource_id: ResourceId,
        claimant_id: ClaimantId,
        claimed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            resource_id,
            claimant_id,
            claimed_at,
        }
    }
}

/// A request to claim one unit of a resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimRequest {
    /// Resource being claimed
    pub resource_id: ResourceId,
    /// Claimant making the request
    pub claimant_id: ClaimantId,
}

impl ClaimRequest {
    /// Create a new claim request.
    #[must_use]
    pub fn new(resource_id: ResourceId, claimant_id: impl Into<ClaimantId>) -> Self {
        Self {
            resource_id,
            claimant_id: claimant_id.into(),
        }
    }
}

/// Successful outcome of a claim attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claimed {
    /// The claim that was recorded
    pub claim: Claim,
    /// Units left right after this claim committed
    pub remaining_after: u32,
}

/// Read-only view used for reporting. Reading it needs no controller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    /// Resource identifier
    pub id: ResourceId,
    /// Display name
    pub name: String,
    /// Units still available
    pub remaining: u32,
    /// Claims recorded in the ledger
    pub claim_count: u64,
}

/// A claim request waiting in the ingestion buffer.
///
/// Ownership moves from the producer to exactly one consumer on dequeue.
/// Delivery is at-least-once; the workflow's duplicate check makes redelivery safe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    /// The request itself
    pub request: ClaimRequest,
    /// When the buffer accepted it
    pub accepted_at: DateTime<Utc>,
    /// Position within its partition, assigned on enqueue where the buffer supports it
    pub sequence: Option<u64>,
}

impl PendingRequest {
    /// Wrap a request accepted at the given time.
    #[must_use]
    pub const fn new(request: ClaimRequest, accepted_at: DateTime<Utc>) -> Self {
        Self {
            request,
            accepted_at,
            sequence: None,
        }
    }

    /// Partition key: every request for one resource shares it.
    #[must_use]
    pub const fn resource_id(&self) -> ResourceId {
        self.request.resource_id
    }
}

/// A time-bounded grant of mutual exclusion from a lock service.
///
/// Owned by the controller call that acquired it. Released explicitly on every
/// exit path, or by expiry if the holder crashes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockLease {
    /// Lock key (derived from the resource id)
    pub key: String,
    /// Token proving ownership; release and confirmation compare against it
    pub holder_token: Uuid,
    /// When the lease self-expires
    pub expires_at: DateTime<Utc>,
}

/// Parameters for a lease acquisition.
///
/// The holder token is chosen by the caller before waiting, so a wait that is
/// interrupted half-way can still release whatever it may have obtained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseRequest {
    /// Lock key
    pub key: String,
    /// Token the lease will be held under
    pub holder_token: Uuid,
    /// How long to wait for the lock before giving up
    pub wait_time: Duration,
    /// How long the lease lives before it self-expires
    pub lease_time: Duration,
}

impl LeaseRequest {
    /// Build a request with a fresh random holder token.
    #[must_use]
    pub fn new(key: impl Into<String>, wait_time: Duration, lease_time: Duration) -> Self {
        Self {
            key: key.into(),
            holder_token: Uuid::new_v4(),
            wait_time,
            lease_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decrement_takes_one_unit_and_bumps_version() {
        let resource = Resource::new(ResourceId::new(1), "concert", 2);
        let after = resource.decremented();

        assert!(matches!(
            after,
            Ok(Resource { remaining: 1, version, .. }) if version == Version::new(1)
        ));
    }

    #[test]
    fn decrement_at_zero_is_an_invariant_violation() {
        let resource = Resource::new(ResourceId::new(1), "concert", 0);
        assert!(!resource.has_stock());
        assert!(matches!(
            resource.decremented(),
            Err(ClaimError::InvariantViolation(_))
        ));
    }

    #[test]
    fn pending_request_keeps_resource_as_partition_key() {
        let request = ClaimRequest::new(ResourceId::new(8), "user_1");
        let pending = PendingRequest::new(request, Utc::now());
        assert_eq!(pending.resource_id(), ResourceId::new(8));
    }

    #[test]
    fn lease_requests_get_distinct_tokens() {
        let a = LeaseRequest::new("k", Duration::from_secs(5), Duration::from_secs(10));
        let b = LeaseRequest::new("k", Duration::from_secs(5), Duration::from_secs(10));
        assert_ne!(a.holder_token, b.holder_token);
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn pending_request_serializes() {
        let request = ClaimRequest::new(ResourceId::new(3), "user_9");
        let pending = PendingRequest::new(request, Utc::now());
        let json = serde_json::to_string(&pending).expect("serialize");
        assert!(json.contains("user_9"));
    }

    proptest! {
        #[test]
        fn repeated_decrements_never_go_negative(start in 0u32..50, attempts in 0usize..80) {
            let mut resource = Resource::new(ResourceId::new(1), "r", start);
            let mut taken = 0u32;
            for _ in 0..attempts {
                match resource.decremented() {
                    Ok(next) => {
                        resource = next;
                        taken += 1;
                    }
                    Err(ClaimError::InvariantViolation(_)) => prop_assert_eq!(resource.remaining, 0),
                    Err(other) => prop_assert!(false, "unexpected error {other}"),
                }
            }
            prop_assert_eq!(resource.remaining + taken, start);
            prop_assert_eq!(resource.version.value(), u64::from(taken));
        }
    }
}

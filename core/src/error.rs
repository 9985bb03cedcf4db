//! Error taxonomy.
//!
//! Backends report failures with their own narrow enums ([`StoreError`],
//! [`LockError`], [`BufferError`]). Callers of the engine see a single
//! [`ClaimError`], whose variants are chosen where the failure is raised and
//! carry their own retry classification via [`ClaimError::class`]. Nothing
//! downstream decides retryability by inspecting where an error came from.

use crate::ids::{ClaimantId, ResourceId, Version};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a resource store or claim ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No resource with this id exists.
    #[error("Resource not found: {0}")]
    NotFound(ResourceId),

    /// Conditional update lost: the stored version moved since it was read.
    #[error("Version conflict on resource {resource_id}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Resource being updated
        resource_id: ResourceId,
        /// Version the caller read
        expected: Version,
        /// Version actually stored
        actual: Version,
    },

    /// The write would violate a store-level invariant (for example a negative count).
    #[error("Constraint violated: {0}")]
    Constraint(String),

    /// Database connection or query failure.
    #[error("Database error: {0}")]
    Database(String),
}

/// Errors raised by a distributed lock service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The lock was not obtained within the wait time.
    #[error("Timed out after {waited:?} waiting for lock '{key}'")]
    Timeout {
        /// Lock key
        key: String,
        /// How long we waited
        waited: Duration,
    },

    /// The wait was interrupted before the lock was obtained.
    #[error("Interrupted while waiting for lock '{0}'")]
    Interrupted(String),

    /// Backend failure (connection lost, script error, ...).
    #[error("Lock backend error: {0}")]
    Backend(String),
}

/// Errors raised by an ingestion buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// The buffer cannot accept requests (closed, broker unreachable, ...).
    #[error("Ingestion buffer unavailable: {0}")]
    Unavailable(String),

    /// No such partition.
    #[error("Invalid partition {partition} (buffer has {partitions})")]
    InvalidPartition {
        /// Requested partition
        partition: u32,
        /// Partitions the buffer has
        partitions: u32,
    },

    /// The partition already has an active consumer.
    #[error("Partition {0} already has a consumer")]
    PartitionTaken(u32),

    /// A buffered message could not be decoded.
    #[error("Failed to decode pending request: {0}")]
    Decode(String),

    /// Transport failure while consuming.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// How a [`ClaimError`] should be treated by whoever receives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A final business answer (`OutOfStock`, `DuplicateClaim`, `NotFound`). Never retried.
    Business,
    /// Transient contention the engine retries internally.
    Retryable,
    /// Transient from the caller's point of view; the engine does not retry it.
    CallerRetryable,
    /// Infrastructure or programming failure.
    Failure,
}

/// The caller-facing result of a failed claim attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    /// Unknown resource.
    #[error("Resource not found: {0}")]
    NotFound(ResourceId),

    /// No units left.
    #[error("Resource {0} is out of stock")]
    OutOfStock(ResourceId),

    /// This claimant already holds a claim on this resource.
    #[error("Claimant {claimant_id} already claimed resource {resource_id}")]
    DuplicateClaim {
        /// Resource
        resource_id: ResourceId,
        /// Claimant
        claimant_id: ClaimantId,
    },

    /// Optimistic update lost the race. Retried internally.
    #[error("Version conflict on resource {resource_id}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Resource
        resource_id: ResourceId,
        /// Version that was read
        expected: Version,
        /// Version that was stored
        actual: Version,
    },

    /// Optimistic retries ran out.
    #[error("Gave up on resource {resource_id} after {attempts} attempts")]
    RetryExhausted {
        /// Resource
        resource_id: ResourceId,
        /// Total attempts made (initial + retries)
        attempts: usize,
    },

    /// The lease could not be acquired within the wait time.
    #[error("Timed out after {waited:?} waiting for the lock on resource {resource_id}")]
    LockTimeout {
        /// Resource
        resource_id: ResourceId,
        /// Configured wait time
        waited: Duration,
    },

    /// The wait for the lease was interrupted.
    #[error("Interrupted while acquiring the lock on resource {0}")]
    AcquisitionInterrupted(ResourceId),

    /// The lease expired while the critical section was still running.
    ///
    /// `lease_time` is shorter than the real critical section: a configuration bug.
    #[error("Lease on resource {0} expired before the critical section finished")]
    LeaseLost(ResourceId),

    /// A logic invariant was broken (for example decrementing an empty counter
    /// inside a held critical section).
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    /// Store or ledger failure.
    #[error("Store error: {0}")]
    Store(StoreError),

    /// Lock service failure.
    #[error("Lock service error: {0}")]
    Lock(LockError),

    /// Ingestion buffer failure.
    #[error("Ingestion buffer error: {0}")]
    Buffer(#[from] BufferError),
}

impl ClaimError {
    /// Classification decided by the variant itself.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound(_) | Self::OutOfStock(_) | Self::DuplicateClaim { .. } => {
                ErrorClass::Business
            }
            Self::VersionConflict { .. } => ErrorClass::Retryable,
            Self::LockTimeout { .. } | Self::RetryExhausted { .. } => ErrorClass::CallerRetryable,
            Self::AcquisitionInterrupted(_)
            | Self::LeaseLost(_)
            | Self::InvariantViolation(_)
            | Self::Store(_)
            | Self::Lock(_)
            | Self::Buffer(_) => ErrorClass::Failure,
        }
    }

    /// Whether the engine may re-run the workflow after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Retryable)
    }

    /// Short stable label, used for metrics and reports.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::OutOfStock(_) => "out_of_stock",
            Self::DuplicateClaim { .. } => "duplicate_claim",
            Self::VersionConflict { .. } => "version_conflict",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::AcquisitionInterrupted(_) => "acquisition_interrupted",
            Self::LeaseLost(_) => "lease_lost",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::Store(_) => "store",
            Self::Lock(_) => "lock",
            Self::Buffer(_) => "buffer",
        }
    }
}

impl From<StoreError> for ClaimError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::VersionConflict {
                resource_id,
                expected,
                actual,
            } => Self::VersionConflict {
                resource_id,
                expected,
                actual,
            },
            StoreError::Constraint(reason) => Self::InvariantViolation(reason),
            other @ StoreError::Database(_) => Self::Store(other),
        }
    }
}

impl From<LockError> for ClaimError {
    fn from(err: LockError) -> Self {
        Self::Lock(err)
    }
}

//! # Seatguard Core
//!
//! Core types and contracts for the seatguard concurrency-control engine.
//!
//! The engine answers one question: how do many concurrent callers take units
//! from a finite counter ("seats remaining") without overselling it, and
//! optionally without letting one claimant take two units?
//!
//! ## Core Concepts
//!
//! - **Resource**: the contended counter, with a version stamp
//! - **Claim**: one accepted reservation, recorded in an append-only ledger
//! - **Store transaction**: the unit of work a controller opens for the workflow
//! - **Lock service**: leases for mutual exclusion across processes
//! - **Ingestion buffer**: partitioned queue for the asynchronous path
//!
//! Controllers and the workflow itself live in `seatguard-runtime`; backends
//! live in `seatguard-testing` (in-memory), `seatguard-postgres`,
//! `seatguard-redis`, and `seatguard-redpanda`.
//!
//! ## Example
//!
//! ```ignore
//! use seatguard_core::store::{LockMode, ReservationStore};
//!
//! async fn remaining(store: &dyn ReservationStore, id: ResourceId) -> Result<u32, StoreError> {
//!     let mut tx = store.begin(LockMode::Exclusive).await?;
//!     let resource = tx.get(id).await?;
//!     tx.rollback().await?;
//!     Ok(resource.remaining)
//! }
//! ```

#![forbid(unsafe_code)]

pub mod buffer;
pub mod error;
pub mod ids;
pub mod lock;
pub mod model;
pub mod store;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{BufferError, ClaimError, ErrorClass, LockError, StoreError};
pub use ids::{ClaimantId, ResourceId, Version};
pub use model::{
    Claim, ClaimRequest, Claimed, LeaseRequest, LockLease, PendingRequest, Resource,
    ResourceStatus,
};

/// Environment module - injected dependencies.
///
/// Time is abstracted behind a trait so claims and leases can be stamped
/// deterministically in tests.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use seatguard_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

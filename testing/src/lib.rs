//! # Seatguard Testing
//!
//! In-memory backends and test helpers for seatguard.
//!
//! This crate provides:
//! - [`InMemoryReservationStore`]: transactional store and claim ledger with
//!   record locks, versioned updates, and an optional pool bound
//! - [`InMemoryLockService`]: lease locks with expiry on the tokio clock
//! - [`InMemoryIngestionBuffer`]: partitioned, ordered, bounded queue
//! - [`FixedClock`]: deterministic time
//!
//! ## Example
//!
//! ```ignore
//! use seatguard_testing::{InMemoryReservationStore, test_clock};
//!
//! #[tokio::test]
//! async fn claims_under_record_lock() {
//!     let store = Arc::new(InMemoryReservationStore::new().with_pool_size(10));
//!     let workflow = ReservationWorkflow::new(store, Arc::new(test_clock()), WorkflowConfig::default());
//!     let service = ReservationService::new(Arc::new(workflow), Arc::new(RecordLockController::new()));
//!
//!     let resource = service.create_resource("concert", 100).await?;
//!     service.claim(ClaimRequest::new(resource.id, "user_1")).await?;
//! }
//! ```

use chrono::{DateTime, Utc};
use seatguard_core::environment::Clock;

mod buffer;
mod lock;
mod store;

pub use buffer::InMemoryIngestionBuffer;
pub use lock::InMemoryLockService;
pub use store::InMemoryReservationStore;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making claim timestamps reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use seatguard_testing::mocks::FixedClock;
    /// use seatguard_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_new_year_2025() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }
}

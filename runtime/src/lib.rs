//! # Seatguard Runtime
//!
//! The concurrency-control engine: the reservation workflow, the strategies
//! that make it safe under concurrent execution, and the asynchronous
//! dispatcher that feeds it from an ingestion buffer.
//!
//! ## Core Components
//!
//! - **Workflow** ([`workflow::ReservationWorkflow`]): lookup, duplicate check,
//!   availability check, processing delay, decrement, ledger write
//! - **Controllers** ([`controller`]): baseline, process mutex, record lock,
//!   optimistic versioning with retry, distributed lease
//! - **Service** ([`service::ReservationService`]): the only entry point that
//!   reaches the workflow, always through a controller
//! - **Dispatcher** ([`dispatch::AsyncDispatcher`]): producer plus one worker per
//!   buffer partition
//!
//! ## Example
//!
//! ```ignore
//! use seatguard_runtime::controller::RecordLockController;
//! use seatguard_runtime::service::ReservationService;
//! use seatguard_runtime::workflow::{ReservationWorkflow, WorkflowConfig};
//!
//! let workflow = ReservationWorkflow::new(store, clock, WorkflowConfig::default());
//! let service = ReservationService::new(workflow, Arc::new(RecordLockController::new()));
//!
//! let resource = service.create_resource("concert", 100).await?;
//! let claimed = service.claim(ClaimRequest::new(resource.id, "user_1")).await?;
//! ```

/// Retry with jittered backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

/// The read-check-write sequence every strategy protects
pub mod workflow;

/// Concurrency-control strategies
pub mod controller;

/// Orchestrator that routes every claim through a controller
pub mod service;

/// Asynchronous buffer and worker pool
pub mod dispatch;

/// Error types for runtime configuration
pub mod error {
    use std::time::Duration;
    use thiserror::Error;

    /// Invalid runtime configuration, detected when a component is built.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum ConfigError {
        /// A lease would expire before the critical section it guards can finish.
        #[error(
            "lease time {lease_time:?} must exceed the processing delay {processing_delay:?}"
        )]
        LeaseTooShort {
            /// Configured lease lifetime
            lease_time: Duration,
            /// Configured workflow processing delay
            processing_delay: Duration,
        },

        /// A lease acquisition must be allowed to wait for some time.
        #[error("lease wait time must be greater than zero")]
        ZeroWaitTime,

        /// Workers must run the workflow under a controller that prevents oversell.
        #[error("controller '{0}' cannot be used by dispatch workers")]
        UnsafeWorkerController(&'static str),

        /// A worker pool was asked to own no partitions or an out-of-range one.
        #[error("invalid partition assignment: {0}")]
        InvalidPartitions(String),
    }
}

pub use controller::{
    ConcurrencyController, LeaseConfig, LeaseController, MutexScope, OptimisticController,
    ProcessMutexController, RecordLockController, UnsynchronizedController,
};
pub use dispatch::{AsyncDispatcher, DispatchSnapshot, DispatcherConfig};
pub use error::ConfigError;
pub use retry::RetryPolicy;
pub use service::ReservationService;
pub use workflow::{DecrementMode, ReservationWorkflow, WorkflowConfig};

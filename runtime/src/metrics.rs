//! Prometheus metrics for claim processing.
//!
//! This module provides metric collection for:
//! - Claim outcomes per strategy (succeeded / rejected by reason)
//! - Optimistic retries and exhaustion
//! - Lease timeouts and lost leases
//! - Asynchronous dispatch (accepted / processed / failed)
//!
//! # Example
//!
//! ```rust,no_run
//! use seatguard_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // After a run:
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use seatguard_core::ClaimError;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder.
///
/// Installs the global recorder and renders the Prometheus text format on demand.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address the metrics are advertised on (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), this logs a warning and
    /// succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "claims_succeeded_total",
        "Claims committed, labelled by strategy"
    );
    describe_counter!(
        "claims_rejected_total",
        "Claims that failed, labelled by strategy and reason"
    );
    describe_histogram!(
        "claims_duration_seconds",
        "Time from protect() entry to result, including waits and retries"
    );
    describe_counter!(
        "claims_retries_total",
        "Optimistic attempts that hit a version conflict and were retried"
    );
    describe_counter!(
        "claims_retry_exhausted_total",
        "Optimistic claims that ran out of retries"
    );
    describe_counter!(
        "claims_lock_timeouts_total",
        "Lease acquisitions that timed out"
    );
    describe_counter!(
        "claims_lease_lost_total",
        "Leases found expired before their critical section finished"
    );
    describe_counter!(
        "dispatch_accepted_total",
        "Requests accepted into the ingestion buffer"
    );
    describe_counter!(
        "dispatch_processed_total",
        "Buffered requests processed by a worker, labelled by outcome"
    );
    describe_counter!(
        "dispatch_errors_total",
        "Buffer or transport errors seen by workers"
    );
}

/// Claim outcome recorder.
pub struct ClaimMetrics;

impl ClaimMetrics {
    /// Record the outcome of one protected claim.
    pub fn record_outcome<T>(strategy: &'static str, result: &Result<T, ClaimError>, elapsed: Duration) {
        match result {
            Ok(_) => counter!("claims_succeeded_total", "strategy" => strategy).increment(1),
            Err(err) => {
                counter!("claims_rejected_total", "strategy" => strategy, "reason" => err.kind())
                    .increment(1);
            }
        }
        histogram!("claims_duration_seconds", "strategy" => strategy).record(elapsed.as_secs_f64());
    }

    /// Record a retried version conflict.
    pub fn record_retry() {
        counter!("claims_retries_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("claims_retry_exhausted_total").increment(1);
    }

    /// Record a lease wait that timed out.
    pub fn record_lock_timeout() {
        counter!("claims_lock_timeouts_total").increment(1);
    }

    /// Record a lease that expired under its holder.
    pub fn record_lease_lost() {
        counter!("claims_lease_lost_total").increment(1);
    }
}

/// Asynchronous dispatch recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a request accepted into the buffer.
    pub fn record_accepted() {
        counter!("dispatch_accepted_total").increment(1);
    }

    /// Record a buffered request processed by a worker.
    pub fn record_processed(outcome: &'static str) {
        counter!("dispatch_processed_total", "outcome" => outcome).increment(1);
    }

    /// Record a buffer/transport error on the consumer side.
    pub fn record_error() {
        counter!("dispatch_errors_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seatguard_core::ResourceId;

    #[test]
    #[allow(clippy::expect_used)]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().expect("valid addr");
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().expect("valid addr");
        let mut server = MetricsServer::new(addr);
        server.start().expect("recorder installs");

        ClaimMetrics::record_outcome::<()>("row_lock", &Ok(()), Duration::from_millis(12));
        ClaimMetrics::record_outcome::<()>(
            "row_lock",
            &Err(ClaimError::OutOfStock(ResourceId::new(1))),
            Duration::from_millis(3),
        );
        DispatchMetrics::record_accepted();

        // Another test may have installed the recorder first; metrics are still recorded.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("claims_succeeded_total"));
            assert!(rendered.contains("out_of_stock"));
            assert!(rendered.contains("dispatch_accepted_total"));
        }
    }
}

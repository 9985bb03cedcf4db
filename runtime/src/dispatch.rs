//! Asynchronous claim path: producer, ingestion buffer, worker pool.
//!
//! ```text
//! submit() ──▶ IngestionBuffer ──▶ worker per partition ──▶ ReservationService::claim
//!    │                                      │
//!    └── Ok = accepted, not claimed         └── failures logged and counted here
//! ```
//!
//! The producer only waits for buffer admission. Workers own one partition
//! each, so requests for one resource are processed in the order they were
//! accepted. Outcomes never flow back to the producer; they are visible through
//! [`DispatchSnapshot`], logs, and metrics.

use crate::error::ConfigError;
use crate::metrics::DispatchMetrics;
use crate::service::ReservationService;
use futures::StreamExt;
use seatguard_core::buffer::{IngestionBuffer, RequestStream};
use seatguard_core::{BufferError, ClaimRequest, ErrorClass, PendingRequest};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Dispatcher errors.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Invalid dispatcher configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Buffer failure while submitting or subscribing
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// Accepted requests were still unprocessed when the drain deadline passed
    #[error("drain timed out with {pending} requests unprocessed")]
    DrainTimeout {
        /// Accepted minus processed at the deadline
        pending: u64,
    },

    /// Workers were started twice
    #[error("workers already started")]
    AlreadyStarted,
}

/// Worker pool settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Partitions this process consumes. `None` consumes every partition.
    ///
    /// Split partitions between processes to scale out; never give one
    /// partition to two processes.
    pub partitions: Option<Vec<u32>>,
}

impl DispatcherConfig {
    /// Consume only the given partitions.
    #[must_use]
    pub fn with_partitions(mut self, partitions: Vec<u32>) -> Self {
        self.partitions = Some(partitions);
        self
    }
}

/// Point-in-time copy of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    /// Requests admitted by the buffer
    pub accepted: u64,
    /// Requests a worker finished with, whatever the outcome
    pub processed: u64,
    /// Claims committed
    pub succeeded: u64,
    /// Business rejections (`OutOfStock`, `DuplicateClaim`, `NotFound`)
    pub rejected: u64,
    /// Everything else a worker saw fail, including undecodable messages
    pub failed: u64,
}

impl DispatchSnapshot {
    /// Accepted requests not yet processed.
    #[must_use]
    pub const fn pending(&self) -> u64 {
        self.accepted.saturating_sub(self.processed)
    }
}

#[derive(Debug, Default)]
struct DispatchStats {
    accepted: AtomicU64,
    processed: AtomicU64,
    succeeded: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    progress: Notify,
}

impl DispatchStats {
    fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            accepted: self.accepted.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    fn record(&self, outcome: &AtomicU64, label: &'static str) {
        outcome.fetch_add(1, Ordering::SeqCst);
        self.processed.fetch_add(1, Ordering::SeqCst);
        DispatchMetrics::record_processed(label);
        self.progress.notify_waiters();
    }
}

/// Producer and worker pool over one ingestion buffer.
pub struct AsyncDispatcher {
    buffer: Arc<dyn IngestionBuffer>,
    service: ReservationService,
    config: DispatcherConfig,
    stats: Arc<DispatchStats>,
    shutdown: broadcast::Sender<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AsyncDispatcher {
    /// Create a dispatcher whose workers claim through `service`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::UnsafeWorkerController`] if the service's controller
    ///   does not prevent oversell
    /// - [`ConfigError::InvalidPartitions`] if the partition list is empty or
    ///   out of range
    pub fn new(
        buffer: Arc<dyn IngestionBuffer>,
        service: ReservationService,
        config: DispatcherConfig,
    ) -> Result<Self, ConfigError> {
        let controller = service.controller();
        if !controller.prevents_oversell() {
            return Err(ConfigError::UnsafeWorkerController(controller.name()));
        }

        if let Some(partitions) = &config.partitions {
            if partitions.is_empty() {
                return Err(ConfigError::InvalidPartitions(
                    "no partitions assigned".to_string(),
                ));
            }
            if let Some(bad) = partitions.iter().find(|p| **p >= buffer.partitions()) {
                return Err(ConfigError::InvalidPartitions(format!(
                    "partition {bad} out of range (buffer has {})",
                    buffer.partitions()
                )));
            }
        }

        let (shutdown, _) = broadcast::channel(1);
        Ok(Self {
            buffer,
            service,
            config,
            stats: Arc::new(DispatchStats::default()),
            shutdown,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Accept a request into the buffer.
    ///
    /// `Ok` means accepted, not claimed.
    ///
    /// # Errors
    ///
    /// The buffer's admission error, returned immediately.
    pub async fn submit(&self, request: ClaimRequest) -> Result<(), DispatchError> {
        let pending = PendingRequest::new(request, self.service.workflow().clock().now());
        let resource_id = pending.resource_id();

        self.buffer.enqueue(pending).await?;

        self.stats.accepted.fetch_add(1, Ordering::SeqCst);
        DispatchMetrics::record_accepted();
        debug!(resource_id = %resource_id, "Request accepted");
        Ok(())
    }

    /// Subscribe to each assigned partition and spawn one worker per partition.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::AlreadyStarted`] on a second call
    /// - [`DispatchError::Buffer`] if a partition cannot be subscribed
    pub async fn start(&self) -> Result<(), DispatchError> {
        if !self.lock_workers().is_empty() {
            return Err(DispatchError::AlreadyStarted);
        }

        let partitions = self
            .config
            .partitions
            .clone()
            .unwrap_or_else(|| (0..self.buffer.partitions()).collect());

        let mut streams = Vec::with_capacity(partitions.len());
        for partition in partitions {
            streams.push((partition, self.buffer.dequeue(partition).await?));
        }

        let handles = streams
            .into_iter()
            .map(|(partition, stream)| {
                let worker = Worker {
                    partition,
                    service: self.service.clone(),
                    stats: Arc::clone(&self.stats),
                    shutdown: self.shutdown.subscribe(),
                };
                tokio::spawn(worker.run(stream))
            })
            .collect::<Vec<_>>();

        info!(workers = handles.len(), "Dispatch workers started");
        self.lock_workers().extend(handles);
        Ok(())
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> DispatchSnapshot {
        self.stats.snapshot()
    }

    /// Wait until every accepted request has been processed.
    ///
    /// # Errors
    ///
    /// [`DispatchError::DrainTimeout`] if requests are still pending at the deadline.
    pub async fn drain(&self, timeout: Duration) -> Result<DispatchSnapshot, DispatchError> {
        let wait = async {
            loop {
                let progressed = self.stats.progress.notified();
                let snapshot = self.stats.snapshot();
                if snapshot.pending() == 0 {
                    return snapshot;
                }
                progressed.await;
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| DispatchError::DrainTimeout {
                pending: self.stats.snapshot().pending(),
            })
    }

    /// Signal every worker to stop after its current request and wait for them.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(());

        let handles = std::mem::take(&mut *self.lock_workers());

        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "Dispatch worker panicked");
            }
        }
        info!(stats = ?self.stats.snapshot(), "Dispatch workers stopped");
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Worker {
    partition: u32,
    service: ReservationService,
    stats: Arc<DispatchStats>,
    shutdown: broadcast::Receiver<()>,
}

impl Worker {
    async fn run(mut self, mut stream: RequestStream) {
        info!(partition = self.partition, "Worker consuming partition");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(partition = self.partition, "Worker received shutdown signal");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(pending)) => self.handle(pending).await,
                    Some(Err(err)) => self.handle_buffer_error(&err),
                    None => {
                        warn!(partition = self.partition, "Partition stream ended");
                        break;
                    }
                }
            }
        }
    }

    async fn handle(&self, pending: PendingRequest) {
        let PendingRequest {
            request,
            sequence,
            ..
        } = pending;
        let resource_id = request.resource_id;
        let claimant_id = request.claimant_id.clone();

        match self.service.claim(request).await {
            Ok(_) => self.stats.record(&self.stats.succeeded, "succeeded"),
            Err(err) if matches!(err.class(), ErrorClass::Business) => {
                self.stats.record(&self.stats.rejected, "rejected");
            }
            Err(err) => {
                error!(
                    partition = self.partition,
                    ?sequence,
                    resource_id = %resource_id,
                    claimant_id = %claimant_id,
                    error = %err,
                    "Buffered claim failed"
                );
                self.stats.record(&self.stats.failed, "failed");
            }
        }
    }

    fn handle_buffer_error(&self, err: &BufferError) {
        DispatchMetrics::record_error();
        error!(partition = self.partition, error = %err, "Buffer error on consumer side");
        // An undecodable message was accepted and is now consumed.
        if matches!(err, BufferError::Decode(_)) {
            self.stats.record(&self.stats.failed, "failed");
        }
    }
}

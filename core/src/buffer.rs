//! Ingestion buffer contract for the asynchronous claim path.
//!
//! ```text
//! ┌──────────┐  enqueue   ┌─────────────────────────────┐
//! │ Producer │──────────▶ │ partition = id % partitions │
//! └──────────┘            ├─────────┬─────────┬─────────┤
//!                         │   p0    │   p1    │   p2    │  ordered per partition
//!                         └────┬────┴────┬────┴────┬────┘
//!                              ▼         ▼         ▼
//!                          worker 0  worker 1  worker 2     one consumer per partition
//!                              │         │         │
//!                              └─────────┴─────────┘
//!                                        ▼
//!                          workflow under a strict or optimistic controller
//! ```
//!
//! # Key Principles
//!
//! - **Partitioned by resource**: all requests for one resource share a partition
//! - **Ordered within partition**: consumed in the order they were enqueued
//! - **At-least-once delivery**: a request may be seen twice after a consumer crash;
//!   the workflow's duplicate check makes that safe
//! - **Acceptance, not success**: `enqueue` returning `Ok` only means the request
//!   was accepted
//!
//! # Implementations
//!
//! - `InMemoryIngestionBuffer` (in `seatguard-testing`)
//! - `RedpandaIngestionBuffer` (in `seatguard-redpanda`)

use crate::error::BufferError;
use crate::model::PendingRequest;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;

/// Stream of pending requests from one partition.
pub type RequestStream = Pin<Box<dyn Stream<Item = Result<PendingRequest, BufferError>> + Send>>;

/// Boxed future returned by buffer operations.
pub type BufferFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BufferError>> + Send + 'a>>;

/// Ordered, partitioned queue between request acceptance and processing.
pub trait IngestionBuffer: Send + Sync {
    /// Number of partitions.
    fn partitions(&self) -> u32;

    /// Accept a request.
    ///
    /// May wait for buffer capacity but never for processing.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the buffer cannot take requests
    fn enqueue(&self, request: PendingRequest) -> BufferFuture<'_, ()>;

    /// Take ownership of one partition and stream its requests in order.
    ///
    /// # Errors
    ///
    /// - `InvalidPartition`: out of range
    /// - `PartitionTaken`: the partition already has a consumer
    /// - `Unavailable`/`Transport`: backend failure
    fn dequeue(&self, partition: u32) -> BufferFuture<'_, RequestStream>;
}

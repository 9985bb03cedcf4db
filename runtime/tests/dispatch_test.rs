//! Asynchronous path: producer, in-memory buffer, and worker pool.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use seatguard_core::{ClaimRequest, ResourceId};
use seatguard_runtime::dispatch::DispatchError;
use seatguard_runtime::{
    AsyncDispatcher, ConfigError, ConcurrencyController, DispatchSnapshot, DispatcherConfig,
    OptimisticController, RecordLockController, ReservationService, ReservationWorkflow,
    UnsynchronizedController, WorkflowConfig,
};
use seatguard_testing::{InMemoryIngestionBuffer, InMemoryReservationStore, test_clock};
use std::sync::Arc;
use std::time::Duration;

fn service_with(controller: Arc<dyn ConcurrencyController>) -> ReservationService {
    let workflow = ReservationWorkflow::new(
        Arc::new(InMemoryReservationStore::new().with_pool_size(8)),
        Arc::new(test_clock()),
        WorkflowConfig::default(),
    );
    ReservationService::new(Arc::new(workflow), controller)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn buffered_claims_never_oversell() {
    let service = service_with(Arc::new(RecordLockController::new()));
    let resource = service.create_resource("concert", 25).await.expect("create");
    let buffer = Arc::new(InMemoryIngestionBuffer::new(4, 1024));
    let dispatcher = AsyncDispatcher::new(buffer, service.clone(), DispatcherConfig::default())
        .expect("valid dispatcher");
    dispatcher.start().await.expect("start workers");

    for i in 0..100 {
        dispatcher
            .submit(ClaimRequest::new(resource.id, format!("user_{i}")))
            .await
            .expect("accepted");
    }

    let stats = dispatcher
        .drain(Duration::from_secs(10))
        .await
        .expect("drained");
    dispatcher.shutdown().await;

    assert_eq!(
        stats,
        DispatchSnapshot {
            accepted: 100,
            processed: 100,
            succeeded: 25,
            rejected: 75,
            failed: 0,
        }
    );
    let status = service.status(resource.id).await.expect("status");
    assert_eq!(status.remaining, 0);
    assert_eq!(status.claim_count, 25);
}

#[tokio::test]
async fn redelivered_request_is_rejected_as_duplicate() {
    let service = service_with(Arc::new(OptimisticController::default()));
    let resource = service.create_resource("concert", 5).await.expect("create");
    let buffer = Arc::new(InMemoryIngestionBuffer::new(2, 16));
    let dispatcher = AsyncDispatcher::new(buffer, service.clone(), DispatcherConfig::default())
        .expect("valid dispatcher");
    dispatcher.start().await.expect("start workers");

    for _ in 0..2 {
        dispatcher
            .submit(ClaimRequest::new(resource.id, "A"))
            .await
            .expect("accepted");
    }
    let stats = dispatcher
        .drain(Duration::from_secs(5))
        .await
        .expect("drained");
    dispatcher.shutdown().await;

    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.rejected, 1);
    assert_eq!(service.status(resource.id).await.expect("status").remaining, 4);
}

#[tokio::test]
async fn unknown_resource_is_a_consumer_side_rejection() {
    let service = service_with(Arc::new(RecordLockController::new()));
    let buffer = Arc::new(InMemoryIngestionBuffer::new(1, 16));
    let dispatcher = AsyncDispatcher::new(buffer, service, DispatcherConfig::default())
        .expect("valid dispatcher");
    dispatcher.start().await.expect("start workers");

    // The producer only learns that the request was accepted.
    dispatcher
        .submit(ClaimRequest::new(ResourceId::new(404), "a"))
        .await
        .expect("accepted");

    let stats = dispatcher
        .drain(Duration::from_secs(5))
        .await
        .expect("drained");
    dispatcher.shutdown().await;
    assert_eq!(stats.rejected, 1);
}

#[tokio::test]
async fn drain_times_out_without_workers() {
    let service = service_with(Arc::new(RecordLockController::new()));
    let resource = service.create_resource("concert", 1).await.expect("create");
    let buffer = Arc::new(InMemoryIngestionBuffer::new(1, 16));
    let dispatcher = AsyncDispatcher::new(buffer, service, DispatcherConfig::default())
        .expect("valid dispatcher");

    dispatcher
        .submit(ClaimRequest::new(resource.id, "a"))
        .await
        .expect("accepted");

    let result = dispatcher.drain(Duration::from_millis(50)).await;
    assert!(matches!(result, Err(DispatchError::DrainTimeout { pending: 1 })));
}

#[tokio::test]
async fn workers_refuse_the_unsynchronized_controller() {
    let service = service_with(Arc::new(UnsynchronizedController::new()));
    let buffer = Arc::new(InMemoryIngestionBuffer::new(1, 16));

    let result = AsyncDispatcher::new(buffer, service, DispatcherConfig::default());

    assert!(matches!(
        result,
        Err(ConfigError::UnsafeWorkerController("unsynchronized"))
    ));
}

#[tokio::test]
async fn partition_assignment_is_validated_and_exclusive() {
    let buffer = Arc::new(InMemoryIngestionBuffer::new(2, 16));

    let out_of_range = AsyncDispatcher::new(
        Arc::clone(&buffer) as _,
        service_with(Arc::new(RecordLockController::new())),
        DispatcherConfig::default().with_partitions(vec![2]),
    );
    assert!(matches!(out_of_range, Err(ConfigError::InvalidPartitions(_))));

    let first = AsyncDispatcher::new(
        Arc::clone(&buffer) as _,
        service_with(Arc::new(RecordLockController::new())),
        DispatcherConfig::default().with_partitions(vec![0]),
    )
    .expect("valid dispatcher");
    first.start().await.expect("owns partition 0");
    assert!(matches!(first.start().await, Err(DispatchError::AlreadyStarted)));

    let second = AsyncDispatcher::new(
        Arc::clone(&buffer) as _,
        service_with(Arc::new(RecordLockController::new())),
        DispatcherConfig::default(),
    )
    .expect("valid dispatcher");
    assert!(matches!(second.start().await, Err(DispatchError::Buffer(_))));

    first.shutdown().await;
}

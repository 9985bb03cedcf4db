//! Turns a [`Config`] into stores, lock services, buffers, and services.

use crate::config::{Backend, Config, Strategy};
use anyhow::Context;
use seatguard_core::buffer::IngestionBuffer;
use seatguard_core::environment::SystemClock;
use seatguard_core::lock::LockService;
use seatguard_core::store::ReservationStore;
use seatguard_postgres::PostgresReservationStore;
use seatguard_redis::RedisLockService;
use seatguard_runtime::{
    ConcurrencyController, ConfigError, LeaseConfig, LeaseController, MutexScope,
    OptimisticController, ProcessMutexController, RecordLockController, ReservationService,
    ReservationWorkflow, RetryPolicy, UnsynchronizedController, WorkflowConfig,
};
use seatguard_testing::{InMemoryIngestionBuffer, InMemoryLockService, InMemoryReservationStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Shared backends for every scenario in a run.
#[derive(Clone)]
pub struct Backends {
    /// Resource store and claim ledger
    pub store: Arc<dyn ReservationStore>,
    /// Lease lock service
    pub locks: Arc<dyn LockService>,
}

/// Connect the configured store and lock service.
///
/// # Errors
///
/// Returns an error if `PostgreSQL` or Redis cannot be reached.
pub async fn connect_backends(config: &Config) -> anyhow::Result<Backends> {
    let store: Arc<dyn ReservationStore> = match config.backend {
        Backend::Memory => {
            info!(pool_size = config.memory.pool_size, "Using in-memory store");
            let store = InMemoryReservationStore::new();
            if config.memory.pool_size == 0 {
                Arc::new(store)
            } else {
                Arc::new(store.with_pool_size(config.memory.pool_size))
            }
        }
        Backend::Postgres => {
            info!(max_connections = config.postgres.max_connections, "Connecting to PostgreSQL");
            let store = PostgresReservationStore::connect(
                &config.postgres.url,
                config.postgres.max_connections,
            )
            .await
            .context("Failed to connect to PostgreSQL")?;
            store.migrate().await.context("Failed to migrate schema")?;
            Arc::new(store)
        }
    };

    let locks: Arc<dyn LockService> = match &config.redis.url {
        Some(url) => {
            info!("Using Redis lease locks");
            Arc::new(
                RedisLockService::new(url)
                    .await
                    .context("Failed to connect to Redis")?,
            )
        }
        None => {
            info!("Using in-process lease locks");
            Arc::new(InMemoryLockService::new())
        }
    };

    Ok(Backends { store, locks })
}

/// Workflow settings for one scenario.
#[must_use]
pub fn workflow_config(config: &Config) -> WorkflowConfig {
    WorkflowConfig::default()
        .with_duplicate_prevention(config.load.prevent_duplicates)
        .with_processing_delay(config.load.processing_delay())
}

/// Optimistic retry policy from configuration.
#[must_use]
pub fn retry_policy(config: &Config) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(config.retry.max_retries)
        .initial_delay(Duration::from_millis(config.retry.backoff_ms))
        .max_delay(Duration::from_millis(config.retry.max_backoff_ms))
        .multiplier(config.retry.multiplier)
        .jitter(config.retry.jitter)
        .build()
}

/// Build the controller for `strategy`.
///
/// `interrupt` aborts pending lease waits once it turns `true`.
///
/// # Errors
///
/// Returns [`ConfigError`] if the lease settings are unsafe for the
/// configured processing delay.
pub fn controller(
    strategy: Strategy,
    config: &Config,
    locks: &Arc<dyn LockService>,
    interrupt: &watch::Receiver<bool>,
) -> Result<Arc<dyn ConcurrencyController>, ConfigError> {
    Ok(match strategy {
        Strategy::Unsynchronized => Arc::new(UnsynchronizedController::new()),
        Strategy::RecordLock => Arc::new(RecordLockController::new()),
        Strategy::ProcessMutex => Arc::new(ProcessMutexController::new(MutexScope::PerResource)),
        Strategy::ProcessMutexGlobal => Arc::new(ProcessMutexController::new(MutexScope::Global)),
        Strategy::Optimistic => Arc::new(OptimisticController::new(retry_policy(config))),
        Strategy::Lease => Arc::new(
            LeaseController::new(
                Arc::clone(locks),
                LeaseConfig::new(config.lease.wait_time(), config.lease.lease_time()),
                &workflow_config(config),
            )?
            .with_interrupt(interrupt.clone()),
        ),
    })
}

/// Assemble the service that runs `strategy` over `backends`.
///
/// # Errors
///
/// Returns [`ConfigError`] if the controller cannot be built.
pub fn service(
    strategy: Strategy,
    config: &Config,
    backends: &Backends,
    interrupt: &watch::Receiver<bool>,
) -> Result<ReservationService, ConfigError> {
    let workflow = ReservationWorkflow::new(
        Arc::clone(&backends.store),
        Arc::new(SystemClock),
        workflow_config(config),
    );
    let controller = controller(strategy, config, &backends.locks, interrupt)?;
    Ok(ReservationService::new(Arc::new(workflow), controller))
}

/// Build the ingestion buffer for the asynchronous path.
///
/// # Errors
///
/// Returns an error if the Kafka buffer cannot be created.
pub async fn ingestion_buffer(config: &Config) -> anyhow::Result<Arc<dyn IngestionBuffer>> {
    #[cfg(feature = "redpanda")]
    if let Some(brokers) = &config.redpanda.brokers {
        let buffer = seatguard_redpanda::RedpandaIngestionBuffer::builder()
            .brokers(brokers)
            .topic(&config.redpanda.topic)
            .consumer_group(&config.redpanda.consumer_group)
            .partitions(config.redpanda.partitions)
            .build()
            .context("Failed to create Redpanda buffer")?;
        buffer
            .ensure_topic()
            .await
            .context("Failed to create claim topic")?;
        info!(topic = %config.redpanda.topic, "Using Redpanda ingestion buffer");
        return Ok(Arc::new(buffer));
    }

    #[cfg(not(feature = "redpanda"))]
    if config.redpanda.brokers.is_some() {
        tracing::warn!("REDPANDA_BROKERS is set but the redpanda feature is disabled");
    }

    info!(
        partitions = config.dispatch.partitions,
        capacity = config.dispatch.capacity,
        "Using in-memory ingestion buffer"
    );
    Ok(Arc::new(InMemoryIngestionBuffer::new(
        config.dispatch.partitions.max(1),
        config.dispatch.capacity.max(1),
    )))
}

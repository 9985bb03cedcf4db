//! Redpanda ingestion buffer for seatguard.
//!
//! Implements [`IngestionBuffer`] from `seatguard-core` on a Kafka-compatible
//! topic via rdkafka.
//!
//! # Architecture
//!
//! ```text
//! submit ──▶ FutureProducer ──▶ topic "claim-requests"
//!            key = resource id   ├── partition 0 ──▶ StreamConsumer (assigned) ──▶ worker 0
//!            partition chosen    ├── partition 1 ──▶ StreamConsumer (assigned) ──▶ worker 1
//!            explicitly          └── partition 2 ──▶ StreamConsumer (assigned) ──▶ worker 2
//! ```
//!
//! The producer picks the partition itself with [`ResourceId::partition`], so the
//! mapping is identical to the in-memory buffer and does not depend on the
//! client's key hashing.
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits:
//! - a request's offset is committed only when the consumer asks for the next one,
//!   i.e. after the worker has finished with it
//! - if the process dies first, the request is redelivered and the workflow's
//!   duplicate check turns the replay into a `DuplicateClaim`
//! - order is preserved within a partition
//!
//! # Example
//!
//! ```no_run
//! use seatguard_redpanda::RedpandaIngestionBuffer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let buffer = RedpandaIngestionBuffer::builder()
//!     .brokers("localhost:9092")
//!     .topic("claim-requests")
//!     .partitions(3)
//!     .build()?;
//! buffer.ensure_topic().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use seatguard_core::buffer::{BufferFuture, IngestionBuffer, RequestStream};
use seatguard_core::{BufferError, PendingRequest};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Default topic name.
pub const DEFAULT_TOPIC: &str = "claim-requests";

/// Default consumer group.
pub const DEFAULT_CONSUMER_GROUP: &str = "seatguard-workers";

/// [`IngestionBuffer`] backed by a Redpanda (or Kafka) topic.
pub struct RedpandaIngestionBuffer {
    producer: FutureProducer,
    brokers: String,
    topic: String,
    partitions: u32,
    consumer_group: String,
    timeout: Duration,
    assigned: Arc<Mutex<HashSet<u32>>>,
}

impl RedpandaIngestionBuffer {
    /// Create a buffer with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Unavailable`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, BufferError> {
        Self::builder().brokers(brokers).build()
    }

    /// Start configuring a buffer.
    #[must_use]
    pub fn builder() -> RedpandaIngestionBufferBuilder {
        RedpandaIngestionBufferBuilder::default()
    }

    /// Topic the buffer writes to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Create the topic with the configured partition count if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Unavailable`] if the admin client fails or the
    /// broker rejects the topic.
    pub async fn ensure_topic(&self) -> Result<(), BufferError> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .create()
            .map_err(|e| BufferError::Unavailable(format!("Failed to create admin client: {e}")))?;

        let partitions = i32::try_from(self.partitions)
            .map_err(|e| BufferError::Unavailable(e.to_string()))?;
        let topic = NewTopic::new(&self.topic, partitions, TopicReplication::Fixed(1));
        let results = admin
            .create_topics(&[topic], &AdminOptions::new())
            .await
            .map_err(|e| BufferError::Unavailable(format!("Failed to create topic: {e}")))?;

        for result in results {
            match result {
                Ok(name) => tracing::info!(topic = %name, partitions = self.partitions, "Topic created"),
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    tracing::debug!(topic = %name, "Topic already exists");
                }
                Err((name, code)) => {
                    return Err(BufferError::Unavailable(format!(
                        "Failed to create topic '{name}': {code}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn consumer_for(&self, partition: u32) -> Result<StreamConsumer, BufferError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BufferError::Unavailable(format!("Failed to create consumer: {e}")))?;

        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(&self.topic, to_kafka_partition(partition)?, Offset::Stored)
            .map_err(|e| BufferError::Unavailable(e.to_string()))?;
        consumer
            .assign(&assignment)
            .map_err(|e| BufferError::Unavailable(format!("Failed to assign partition: {e}")))?;

        Ok(consumer)
    }
}

fn to_kafka_partition(partition: u32) -> Result<i32, BufferError> {
    i32::try_from(partition).map_err(|e| BufferError::Transport(e.to_string()))
}

/// Releases a partition assignment when its stream is dropped.
struct AssignmentGuard {
    assigned: Arc<Mutex<HashSet<u32>>>,
    partition: u32,
}

impl Drop for AssignmentGuard {
    fn drop(&mut self) {
        self.assigned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.partition);
    }
}

impl IngestionBuffer for RedpandaIngestionBuffer {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    fn enqueue(&self, request: PendingRequest) -> BufferFuture<'_, ()> {
        Box::pin(async move {
            let partition = request.resource_id().partition(self.partitions);
            let payload = bincode::serialize(&request)
                .map_err(|e| BufferError::Unavailable(format!("Failed to encode request: {e}")))?;
            let key = request.resource_id().to_string();

            let record = FutureRecord::to(&self.topic)
                .partition(to_kafka_partition(partition)?)
                .key(&key)
                .payload(&payload);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        resource_id = %request.resource_id(),
                        claimant_id = %request.request.claimant_id,
                        partition,
                        offset,
                        "Claim request buffered"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %self.topic, error = %kafka_error, "Failed to buffer claim request");
                    Err(BufferError::Unavailable(kafka_error.to_string()))
                }
            }
        })
    }

    fn dequeue(&self, partition: u32) -> BufferFuture<'_, RequestStream> {
        Box::pin(async move {
            if partition >= self.partitions {
                return Err(BufferError::InvalidPartition {
                    partition,
                    partitions: self.partitions,
                });
            }
            if !self
                .assigned
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(partition)
            {
                return Err(BufferError::PartitionTaken(partition));
            }
            let guard = AssignmentGuard {
                assigned: Arc::clone(&self.assigned),
                partition,
            };

            let consumer = self.consumer_for(partition)?;
            let topic = self.topic.clone();
            let kafka_partition = to_kafka_partition(partition)?;

            tracing::info!(
                topic = %topic,
                partition,
                consumer_group = %self.consumer_group,
                "Consuming partition"
            );

            let stream = async_stream::stream! {
                let _guard = guard;
                loop {
                    let (item, offset) = match consumer.recv().await {
                        Ok(message) => {
                            let offset = message.offset();
                            let item = match message.payload() {
                                Some(payload) => bincode::deserialize::<PendingRequest>(payload)
                                    .map(|mut pending| {
                                        pending.sequence = u64::try_from(offset).ok();
                                        pending
                                    })
                                    .map_err(|e| BufferError::Decode(e.to_string())),
                                None => Err(BufferError::Decode("message has no payload".to_string())),
                            };
                            (item, Some(offset))
                        }
                        Err(e) => (Err(BufferError::Transport(e.to_string())), None),
                    };

                    yield item;

                    // The worker has finished with the previous item once it asks for the next.
                    if let Some(offset) = offset {
                        let mut commit = TopicPartitionList::new();
                        let committed = commit
                            .add_partition_offset(&topic, kafka_partition, Offset::Offset(offset + 1))
                            .map_err(|e| e.to_string())
                            .and_then(|()| {
                                consumer
                                    .commit(&commit, CommitMode::Async)
                                    .map_err(|e| e.to_string())
                            });
                        if let Err(error) = committed {
                            tracing::warn!(
                                topic = %topic,
                                partition = kafka_partition,
                                offset,
                                error = %error,
                                "Failed to commit offset (request may be redelivered)"
                            );
                        }
                    }
                }
            };

            Ok(Box::pin(stream) as RequestStream)
        })
    }
}

/// Builder for [`RedpandaIngestionBuffer`].
#[derive(Default)]
pub struct RedpandaIngestionBufferBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    partitions: Option<u32>,
    consumer_group: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
}

impl RedpandaIngestionBufferBuilder {
    /// Comma-separated bootstrap servers.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Topic name. Default: [`DEFAULT_TOPIC`].
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Partition count. Must match the topic. Default: 3.
    #[must_use]
    pub const fn partitions(mut self, partitions: u32) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Consumer group whose committed offsets workers resume from.
    /// Default: [`DEFAULT_CONSUMER_GROUP`].
    #[must_use]
    pub fn consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = Some(group.into());
        self
    }

    /// Producer acknowledgment mode ("0", "1", "all"). Default: "all".
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Producer send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Unavailable`] if brokers are missing, the
    /// partition count is zero, or the producer cannot be created.
    pub fn build(self) -> Result<RedpandaIngestionBuffer, BufferError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BufferError::Unavailable("Brokers not configured".to_string()))?;
        let partitions = self.partitions.unwrap_or(3);
        if partitions == 0 {
            return Err(BufferError::Unavailable(
                "Partition count must be at least 1".to_string(),
            ));
        }
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", &acks)
            .create()
            .map_err(|e| BufferError::Unavailable(format!("Failed to create producer: {e}")))?;

        let topic = self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string());
        let consumer_group = self
            .consumer_group
            .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string());

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            partitions,
            consumer_group = %consumer_group,
            acks = %acks,
            "RedpandaIngestionBuffer created"
        );

        Ok(RedpandaIngestionBuffer {
            producer,
            brokers,
            topic,
            partitions,
            consumer_group,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            assigned: Arc::new(Mutex::new(HashSet::new())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RedpandaIngestionBuffer>();
    }

    #[test]
    fn build_requires_brokers() {
        assert!(matches!(
            RedpandaIngestionBuffer::builder().build(),
            Err(BufferError::Unavailable(_))
        ));
    }

    #[test]
    fn build_rejects_zero_partitions() {
        let result = RedpandaIngestionBuffer::builder()
            .brokers("localhost:9092")
            .partitions(0)
            .build();
        assert!(matches!(result, Err(BufferError::Unavailable(_))));
    }

    #[test]
    fn defaults_apply() {
        // Creating a producer does not contact the broker.
        let buffer = RedpandaIngestionBuffer::new("localhost:9092");
        assert!(buffer.is_ok());
        if let Ok(buffer) = buffer {
            assert_eq!(buffer.topic(), DEFAULT_TOPIC);
            assert_eq!(buffer.partitions(), 3);
        }
    }

    #[tokio::test]
    async fn out_of_range_partition_is_rejected() {
        let Ok(buffer) = RedpandaIngestionBuffer::new("localhost:9092") else {
            return;
        };
        let result = buffer.dequeue(3).await;
        assert!(matches!(
            result,
            Err(BufferError::InvalidPartition { partition: 3, partitions: 3 })
        ));
    }
}

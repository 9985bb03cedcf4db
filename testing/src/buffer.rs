//! In-memory partitioned ingestion buffer.
//!
//! Each partition is a bounded channel. A request lands in partition
//! `resource_id mod partitions`, gets the next sequence number of that
//! partition, and is delivered to the single consumer that took the
//! partition with `dequeue`.

use seatguard_core::buffer::{BufferFuture, IngestionBuffer, RequestStream};
use seatguard_core::{BufferError, PendingRequest};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

struct Partition {
    sender: tokio::sync::Mutex<Option<(mpsc::Sender<PendingRequest>, u64)>>,
    receiver: Mutex<Option<mpsc::Receiver<PendingRequest>>>,
}

/// In-memory implementation of [`IngestionBuffer`].
///
/// # Example
///
/// ```
/// use futures::StreamExt;
/// use seatguard_core::buffer::IngestionBuffer;
/// use seatguard_core::{ClaimRequest, PendingRequest, ResourceId, Utc};
/// use seatguard_testing::InMemoryIngestionBuffer;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let buffer = InMemoryIngestionBuffer::new(4, 128);
/// let request = ClaimRequest::new(ResourceId::new(6), "user_1");
/// buffer.enqueue(PendingRequest::new(request, Utc::now())).await?;
///
/// let mut stream = buffer.dequeue(ResourceId::new(6).partition(4)).await?;
/// let pending = stream.next().await.transpose()?;
/// assert_eq!(pending.and_then(|p| p.sequence), Some(0));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryIngestionBuffer {
    partitions: Arc<Vec<Partition>>,
}

impl InMemoryIngestionBuffer {
    /// Create a buffer with `partitions` partitions of `capacity` slots each.
    ///
    /// A zero partition count is raised to one.
    #[must_use]
    pub fn new(partitions: u32, capacity: usize) -> Self {
        let partitions = (0..partitions.max(1))
            .map(|_| {
                let (sender, receiver) = mpsc::channel(capacity.max(1));
                Partition {
                    sender: tokio::sync::Mutex::new(Some((sender, 0))),
                    receiver: Mutex::new(Some(receiver)),
                }
            })
            .collect();
        Self {
            partitions: Arc::new(partitions),
        }
    }

    /// Stop accepting requests. Consumers drain what is queued, then their
    /// streams end.
    pub async fn close(&self) {
        for partition in self.partitions.iter() {
            partition.sender.lock().await.take();
        }
    }

    fn partition(&self, partition: u32) -> Result<&Partition, BufferError> {
        usize::try_from(partition)
            .ok()
            .and_then(|index| self.partitions.get(index))
            .ok_or(BufferError::InvalidPartition {
                partition,
                partitions: self.partitions(),
            })
    }
}

impl IngestionBuffer for InMemoryIngestionBuffer {
    fn partitions(&self) -> u32 {
        u32::try_from(self.partitions.len()).unwrap_or(u32::MAX)
    }

    fn enqueue(&self, mut request: PendingRequest) -> BufferFuture<'_, ()> {
        Box::pin(async move {
            let partition = self.partition(request.resource_id().partition(self.partitions()))?;

            // Sequence assignment and send happen under one lock so sequence
            // order is delivery order.
            let mut slot = partition.sender.lock().await;
            let (sender, next_sequence) = slot
                .as_mut()
                .ok_or_else(|| BufferError::Unavailable("buffer closed".to_string()))?;

            request.sequence = Some(*next_sequence);
            sender
                .send(request)
                .await
                .map_err(|_| BufferError::Unavailable("consumer gone".to_string()))?;
            *next_sequence += 1;
            Ok(())
        })
    }

    fn dequeue(&self, partition: u32) -> BufferFuture<'_, RequestStream> {
        Box::pin(async move {
            let mut receiver = self
                .partition(partition)?
                .receiver
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or(BufferError::PartitionTaken(partition))?;

            let stream = async_stream::stream! {
                while let Some(request) = receiver.recv().await {
                    yield Ok(request);
                }
            };
            Ok(Box::pin(stream) as RequestStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::StreamExt;
    use seatguard_core::{ClaimRequest, ResourceId};

    fn pending(resource: i64, claimant: &str) -> PendingRequest {
        PendingRequest::new(ClaimRequest::new(ResourceId::new(resource), claimant), Utc::now())
    }

    #[tokio::test]
    async fn requests_for_one_resource_arrive_in_order() {
        let buffer = InMemoryIngestionBuffer::new(3, 64);
        for i in 0..10 {
            buffer
                .enqueue(pending(7, &format!("user_{i}")))
                .await
                .expect("enqueue");
        }
        buffer.close().await;

        let stream = buffer
            .dequeue(ResourceId::new(7).partition(3))
            .await
            .expect("dequeue");
        let received: Vec<_> = stream
            .map(|item| item.expect("item"))
            .collect()
            .await;

        let claimants: Vec<_> = received
            .iter()
            .map(|p| p.request.claimant_id.as_str().to_string())
            .collect();
        let expected: Vec<_> = (0..10).map(|i| format!("user_{i}")).collect();
        assert_eq!(claimants, expected);

        let sequences: Vec<_> = received.iter().filter_map(|p| p.sequence).collect();
        assert_eq!(sequences, (0..10).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn partition_can_only_be_taken_once() {
        let buffer = InMemoryIngestionBuffer::new(2, 8);
        let _first = buffer.dequeue(1).await.expect("first consumer");

        assert!(matches!(
            buffer.dequeue(1).await,
            Err(BufferError::PartitionTaken(1))
        ));
        assert!(matches!(
            buffer.dequeue(2).await,
            Err(BufferError::InvalidPartition { partition: 2, partitions: 2 })
        ));
    }

    #[tokio::test]
    async fn closed_buffer_rejects_requests() {
        let buffer = InMemoryIngestionBuffer::new(1, 8);
        buffer.close().await;

        let result = buffer.enqueue(pending(1, "a")).await;
        assert!(matches!(result, Err(BufferError::Unavailable(_))));
    }
}

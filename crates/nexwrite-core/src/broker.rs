//! Broker Capability Traits
//!
//! The file writer does not depend on a concrete broker client. It names the
//! capabilities it needs as traits, and any client that can assign
//! partitions, look up offsets by time, and poll messages satisfies the
//! contract. The in-memory implementation in [`crate::memory`] is used by
//! tests and local deployments.
//!
//! ## Consumer
//!
//! A consumer handle is owned by exactly one partition consumer task (or by
//! the master loop for the control topic). Assignment is manual: automatic
//! group rebalancing is never used, because each job decides its own start
//! offsets from its configured start time.
//!
//! ## Producer
//!
//! The producer is fire-and-forget with an internal queue; `outq_len`
//! exposes backpressure and `poll_delivery` drives delivery callbacks.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::envelope::Envelope;
use crate::error::Result;

/// Outcome of a single consumer poll.
#[derive(Debug)]
pub enum PollResult {
    /// A message arrived.
    Message(Envelope),
    /// Nothing buffered for the assignment.
    Empty,
    /// The assignment is at the end of its partition log.
    EndOfPartition,
    /// The poll timed out before the broker answered.
    TimedOut,
    /// Transport-level error, retried implicitly on the next poll.
    Error(String),
}

/// Consumer capabilities required from a broker client.
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Assign every partition of `topic` at its latest offset.
    async fn add_topic(&mut self, topic: &str) -> Result<()>;

    /// Assign every partition of `topic` at the offset whose timestamp is at
    /// or after `timestamp_ms`.
    async fn add_topic_at_timestamp(&mut self, topic: &str, timestamp_ms: i64) -> Result<()>;

    /// Assign a single partition at an explicit offset.
    async fn assign_partition_at_offset(
        &mut self,
        topic: &str,
        partition: u32,
        offset: i64,
    ) -> Result<()>;

    /// Whether the topic exists in the broker metadata.
    async fn topic_present(&self, topic: &str) -> bool;

    /// Partition ids of a topic.
    async fn query_topic_partitions(&self, topic: &str) -> Result<Vec<u32>>;

    /// First offset in a partition whose timestamp is >= `timestamp_ms`;
    /// the latest offset when every stored message is older.
    async fn offset_for_time(&self, topic: &str, partition: u32, timestamp_ms: i64)
        -> Result<i64>;

    /// The offset one past the last stored message.
    async fn latest_offset(&self, topic: &str, partition: u32) -> Result<i64>;

    /// Poll the current assignments with a bounded timeout.
    async fn poll(&mut self, timeout: Duration) -> PollResult;
}

/// Producer capabilities required from a broker client.
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Enqueue a payload for delivery.
    async fn produce(&self, payload: Bytes) -> Result<()>;

    /// Number of payloads not yet acknowledged by the broker.
    fn outq_len(&self) -> usize;

    /// Drive delivery callbacks.
    async fn poll_delivery(&self);
}

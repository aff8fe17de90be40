//! In-Memory Broker
//!
//! A process-local broker with the same topic/partition/offset model as a
//! real cluster:
//!
//! - per-partition ordered logs with broker-assigned offsets
//! - broker-assigned (`LogAppendTime`) or producer-supplied (`CreateTime`)
//!   timestamps
//! - offset-for-time lookup per partition
//!
//! Every consumer and producer handle shares the broker state through an
//! `Arc`, so cloning `MemoryBroker` is cheap and handles can be created from
//! any task. Tests drive end-to-end scenarios against it, and local
//! deployments use it as the command/status transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::broker::{BrokerConsumer, BrokerProducer, PollResult};
use crate::envelope::{Envelope, TimestampType};
use crate::error::{Error, Result};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
struct StoredMessage {
    offset: i64,
    timestamp_ms: i64,
    timestamp_type: TimestampType,
    payload: Bytes,
}

type TopicMap = HashMap<String, Vec<Vec<StoredMessage>>>;

/// Shared in-memory broker state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    topics: Arc<RwLock<TopicMap>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a topic with the given partition count. Creating an existing
    /// topic is a no-op.
    pub async fn create_topic(&self, topic: &str, partitions: u32) {
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions.max(1) as usize]);
    }

    /// Append a payload with a broker-assigned timestamp. Returns the offset.
    pub async fn publish(&self, topic: &str, partition: u32, payload: Bytes) -> Result<i64> {
        self.append(topic, partition, payload, now_ms(), TimestampType::LogAppendTime)
            .await
    }

    /// Append a payload with a producer-supplied timestamp. Returns the
    /// offset.
    pub async fn publish_at(
        &self,
        topic: &str,
        partition: u32,
        payload: Bytes,
        timestamp_ms: i64,
    ) -> Result<i64> {
        self.append(topic, partition, payload, timestamp_ms, TimestampType::CreateTime)
            .await
    }

    async fn append(
        &self,
        topic: &str,
        partition: u32,
        payload: Bytes,
        timestamp_ms: i64,
        timestamp_type: TimestampType,
    ) -> Result<i64> {
        let mut topics = self.topics.write().await;
        let log = partition_log_mut(&mut topics, topic, partition)?;
        let offset = log.len() as i64;
        log.push(StoredMessage {
            offset,
            timestamp_ms,
            timestamp_type,
            payload,
        });
        Ok(offset)
    }

    /// A new consumer handle with no assignments.
    pub fn consumer(&self) -> MemoryConsumer {
        MemoryConsumer {
            broker: self.clone(),
            assignments: Vec::new(),
            cursor: 0,
        }
    }

    /// A new fire-and-forget producer for one topic partition.
    pub fn producer(&self, topic: &str, partition: u32) -> MemoryProducer {
        MemoryProducer {
            broker: self.clone(),
            topic: topic.to_string(),
            partition,
            produced: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// All payloads currently stored in a partition (test helper).
    pub async fn payloads(&self, topic: &str, partition: u32) -> Result<Vec<Bytes>> {
        let topics = self.topics.read().await;
        let log = partition_log(&topics, topic, partition)?;
        Ok(log.iter().map(|m| m.payload.clone()).collect())
    }

    async fn partition_count(&self, topic: &str) -> Result<u32> {
        let topics = self.topics.read().await;
        topics
            .get(topic)
            .map(|p| p.len() as u32)
            .ok_or_else(|| Error::TopicNotFound(topic.to_string()))
    }

    async fn end_offset(&self, topic: &str, partition: u32) -> Result<i64> {
        let topics = self.topics.read().await;
        Ok(partition_log(&topics, topic, partition)?.len() as i64)
    }

    async fn first_offset_at_or_after(
        &self,
        topic: &str,
        partition: u32,
        timestamp_ms: i64,
    ) -> Result<i64> {
        let topics = self.topics.read().await;
        let log = partition_log(&topics, topic, partition)?;
        Ok(log
            .iter()
            .find(|m| m.timestamp_ms >= timestamp_ms)
            .map(|m| m.offset)
            .unwrap_or(log.len() as i64))
    }

    async fn fetch(&self, topic: &str, partition: u32, offset: i64) -> Result<Option<Envelope>> {
        let topics = self.topics.read().await;
        let log = partition_log(&topics, topic, partition)?;
        if offset < 0 {
            return Err(Error::OffsetOutOfRange {
                topic: topic.to_string(),
                partition,
                offset,
            });
        }
        Ok(log.get(offset as usize).map(|m| {
            Envelope::new(m.payload.clone(), m.offset, m.timestamp_ms, m.timestamp_type)
        }))
    }
}

fn partition_log<'a>(
    topics: &'a TopicMap,
    topic: &str,
    partition: u32,
) -> Result<&'a Vec<StoredMessage>> {
    topics
        .get(topic)
        .ok_or_else(|| Error::TopicNotFound(topic.to_string()))?
        .get(partition as usize)
        .ok_or(Error::PartitionNotFound {
            topic: topic.to_string(),
            partition,
        })
}

fn partition_log_mut<'a>(
    topics: &'a mut TopicMap,
    topic: &str,
    partition: u32,
) -> Result<&'a mut Vec<StoredMessage>> {
    topics
        .get_mut(topic)
        .ok_or_else(|| Error::TopicNotFound(topic.to_string()))?
        .get_mut(partition as usize)
        .ok_or(Error::PartitionNotFound {
            topic: topic.to_string(),
            partition,
        })
}

#[derive(Debug)]
struct Assignment {
    topic: String,
    partition: u32,
    next_offset: i64,
}

/// Consumer handle over the in-memory broker.
///
/// Polls its assignments round-robin. With a single assignment (the usual
/// case for a partition consumer) this is a plain cursor over the log.
pub struct MemoryConsumer {
    broker: MemoryBroker,
    assignments: Vec<Assignment>,
    cursor: usize,
}

impl MemoryConsumer {
    async fn assign_all(&mut self, topic: &str, offsets: Vec<(u32, i64)>) {
        for (partition, next_offset) in offsets {
            self.assignments.push(Assignment {
                topic: topic.to_string(),
                partition,
                next_offset,
            });
        }
    }

    async fn try_poll(&mut self) -> Result<Option<Envelope>> {
        if self.assignments.is_empty() {
            return Ok(None);
        }
        for _ in 0..self.assignments.len() {
            let idx = self.cursor % self.assignments.len();
            self.cursor = self.cursor.wrapping_add(1);
            let (topic, partition, offset) = {
                let a = &self.assignments[idx];
                (a.topic.clone(), a.partition, a.next_offset)
            };
            if let Some(envelope) = self.broker.fetch(&topic, partition, offset).await? {
                self.assignments[idx].next_offset = offset + 1;
                return Ok(Some(envelope));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl BrokerConsumer for MemoryConsumer {
    async fn add_topic(&mut self, topic: &str) -> Result<()> {
        let partitions = self.broker.partition_count(topic).await?;
        let mut offsets = Vec::new();
        for p in 0..partitions {
            offsets.push((p, self.broker.end_offset(topic, p).await?));
        }
        self.assign_all(topic, offsets).await;
        Ok(())
    }

    async fn add_topic_at_timestamp(&mut self, topic: &str, timestamp_ms: i64) -> Result<()> {
        let partitions = self.broker.partition_count(topic).await?;
        let mut offsets = Vec::new();
        for p in 0..partitions {
            offsets.push((
                p,
                self.broker
                    .first_offset_at_or_after(topic, p, timestamp_ms)
                    .await?,
            ));
        }
        self.assign_all(topic, offsets).await;
        Ok(())
    }

    async fn assign_partition_at_offset(
        &mut self,
        topic: &str,
        partition: u32,
        offset: i64,
    ) -> Result<()> {
        // Validate the partition exists before accepting the assignment.
        let end = self.broker.end_offset(topic, partition).await?;
        let clamped = offset.clamp(0, end);
        self.assign_all(topic, vec![(partition, clamped)]).await;
        Ok(())
    }

    async fn topic_present(&self, topic: &str) -> bool {
        self.broker.partition_count(topic).await.is_ok()
    }

    async fn query_topic_partitions(&self, topic: &str) -> Result<Vec<u32>> {
        let count = self.broker.partition_count(topic).await?;
        Ok((0..count).collect())
    }

    async fn offset_for_time(
        &self,
        topic: &str,
        partition: u32,
        timestamp_ms: i64,
    ) -> Result<i64> {
        self.broker
            .first_offset_at_or_after(topic, partition, timestamp_ms)
            .await
    }

    async fn latest_offset(&self, topic: &str, partition: u32) -> Result<i64> {
        self.broker.end_offset(topic, partition).await
    }

    async fn poll(&mut self, timeout: Duration) -> PollResult {
        match self.try_poll().await {
            Ok(Some(envelope)) => return PollResult::Message(envelope),
            Ok(None) => {}
            Err(e) => return PollResult::Error(e.to_string()),
        }
        // Nothing buffered; wait out the poll timeout once and re-check so
        // callers see bounded latency without busy-looping.
        tokio::time::sleep(timeout).await;
        match self.try_poll().await {
            Ok(Some(envelope)) => PollResult::Message(envelope),
            Ok(None) if self.assignments.is_empty() => PollResult::Empty,
            Ok(None) => PollResult::EndOfPartition,
            Err(e) => PollResult::Error(e.to_string()),
        }
    }
}

/// Fire-and-forget producer handle over the in-memory broker.
pub struct MemoryProducer {
    broker: MemoryBroker,
    topic: String,
    partition: u32,
    produced: Arc<AtomicUsize>,
}

#[async_trait]
impl BrokerProducer for MemoryProducer {
    async fn produce(&self, payload: Bytes) -> Result<()> {
        self.broker.publish(&self.topic, self.partition, payload).await?;
        self.produced.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn outq_len(&self) -> usize {
        // Appends are synchronous; nothing ever waits in an outbound queue.
        0
    }

    async fn poll_delivery(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Topic and publish basics
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_create_topic_and_publish() {
        let broker = MemoryBroker::new();
        broker.create_topic("T", 2).await;
        let o0 = broker.publish("T", 0, Bytes::from("a")).await.unwrap();
        let o1 = broker.publish("T", 0, Bytes::from("b")).await.unwrap();
        assert_eq!((o0, o1), (0, 1));
    }

    #[tokio::test]
    async fn test_publish_unknown_topic_fails() {
        let broker = MemoryBroker::new();
        let err = broker.publish("ghost", 0, Bytes::new()).await.unwrap_err();
        assert!(matches!(err, Error::TopicNotFound(_)));
    }

    #[tokio::test]
    async fn test_publish_unknown_partition_fails() {
        let broker = MemoryBroker::new();
        broker.create_topic("T", 1).await;
        let err = broker.publish("T", 5, Bytes::new()).await.unwrap_err();
        assert!(matches!(err, Error::PartitionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_create_topic_twice_keeps_messages() {
        let broker = MemoryBroker::new();
        broker.create_topic("T", 1).await;
        broker.publish("T", 0, Bytes::from("x")).await.unwrap();
        broker.create_topic("T", 1).await;
        assert_eq!(broker.payloads("T", 0).await.unwrap().len(), 1);
    }

    // ---------------------------------------------------------------
    // Consumer assignment and polling
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_consumer_reads_in_offset_order() {
        let broker = MemoryBroker::new();
        broker.create_topic("T", 1).await;
        for i in 0..3u8 {
            broker.publish("T", 0, Bytes::from(vec![i])).await.unwrap();
        }
        let mut consumer = broker.consumer();
        consumer.assign_partition_at_offset("T", 0, 0).await.unwrap();
        for i in 0..3u8 {
            match consumer.poll(Duration::from_millis(10)).await {
                PollResult::Message(env) => {
                    assert_eq!(env.offset, i as i64);
                    assert_eq!(env.payload, Bytes::from(vec![i]));
                }
                other => panic!("expected message, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_consumer_end_of_partition() {
        let broker = MemoryBroker::new();
        broker.create_topic("T", 1).await;
        let mut consumer = broker.consumer();
        consumer.assign_partition_at_offset("T", 0, 0).await.unwrap();
        match consumer.poll(Duration::from_millis(5)).await {
            PollResult::EndOfPartition => {}
            other => panic!("expected EndOfPartition, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_consumer_without_assignment_is_empty() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.consumer();
        match consumer.poll(Duration::from_millis(5)).await {
            PollResult::Empty => {}
            other => panic!("expected Empty, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_add_topic_assigns_at_latest() {
        let broker = MemoryBroker::new();
        broker.create_topic("T", 1).await;
        broker.publish("T", 0, Bytes::from("old")).await.unwrap();
        let mut consumer = broker.consumer();
        consumer.add_topic("T").await.unwrap();
        // Old message is behind the assignment; new one is delivered.
        broker.publish("T", 0, Bytes::from("new")).await.unwrap();
        match consumer.poll(Duration::from_millis(10)).await {
            PollResult::Message(env) => assert_eq!(env.payload, Bytes::from("new")),
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_offset_for_time() {
        let broker = MemoryBroker::new();
        broker.create_topic("T", 1).await;
        broker.publish_at("T", 0, Bytes::from("a"), 100).await.unwrap();
        broker.publish_at("T", 0, Bytes::from("b"), 200).await.unwrap();
        broker.publish_at("T", 0, Bytes::from("c"), 300).await.unwrap();
        let consumer = broker.consumer();
        assert_eq!(consumer.offset_for_time("T", 0, 150).await.unwrap(), 1);
        assert_eq!(consumer.offset_for_time("T", 0, 200).await.unwrap(), 1);
        assert_eq!(consumer.offset_for_time("T", 0, 301).await.unwrap(), 3);
        assert_eq!(consumer.offset_for_time("T", 0, 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_topic_at_timestamp_replays_history() {
        let broker = MemoryBroker::new();
        broker.create_topic("T", 1).await;
        broker.publish_at("T", 0, Bytes::from("a"), 100).await.unwrap();
        broker.publish_at("T", 0, Bytes::from("b"), 200).await.unwrap();
        let mut consumer = broker.consumer();
        consumer.add_topic_at_timestamp("T", 150).await.unwrap();
        match consumer.poll(Duration::from_millis(10)).await {
            PollResult::Message(env) => {
                assert_eq!(env.payload, Bytes::from("b"));
                assert_eq!(env.timestamp_type, TimestampType::CreateTime);
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_assignment_offset_clamped_to_log() {
        let broker = MemoryBroker::new();
        broker.create_topic("T", 1).await;
        broker.publish("T", 0, Bytes::from("a")).await.unwrap();
        let mut consumer = broker.consumer();
        consumer.assign_partition_at_offset("T", 0, 99).await.unwrap();
        match consumer.poll(Duration::from_millis(5)).await {
            PollResult::EndOfPartition => {}
            other => panic!("expected EndOfPartition, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_topic_present_and_partitions() {
        let broker = MemoryBroker::new();
        broker.create_topic("T", 3).await;
        let consumer = broker.consumer();
        assert!(consumer.topic_present("T").await);
        assert!(!consumer.topic_present("ghost").await);
        assert_eq!(
            consumer.query_topic_partitions("T").await.unwrap(),
            vec![0, 1, 2]
        );
    }

    #[tokio::test]
    async fn test_round_robin_across_partitions() {
        let broker = MemoryBroker::new();
        broker.create_topic("T", 2).await;
        broker.publish("T", 0, Bytes::from("p0")).await.unwrap();
        broker.publish("T", 1, Bytes::from("p1")).await.unwrap();
        let mut consumer = broker.consumer();
        consumer.add_topic_at_timestamp("T", 0).await.unwrap();
        let mut seen = Vec::new();
        for _ in 0..2 {
            if let PollResult::Message(env) = consumer.poll(Duration::from_millis(10)).await {
                seen.push(env.payload);
            }
        }
        seen.sort();
        assert_eq!(seen, vec![Bytes::from("p0"), Bytes::from("p1")]);
    }

    // ---------------------------------------------------------------
    // Producer
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_producer_appends_to_topic() {
        let broker = MemoryBroker::new();
        broker.create_topic("status", 1).await;
        let producer = broker.producer("status", 0);
        producer.produce(Bytes::from("report")).await.unwrap();
        assert_eq!(producer.outq_len(), 0);
        assert_eq!(broker.payloads("status", 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_producer_unknown_topic_fails() {
        let broker = MemoryBroker::new();
        let producer = broker.producer("ghost", 0);
        assert!(producer.produce(Bytes::from("x")).await.is_err());
    }
}

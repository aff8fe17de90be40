//! Partition Consumer
//!
//! One task per `(topic, partition)`. Owns its broker consumer handle and
//! drives the state machine
//!
//! ```text
//! NotInitialized -> Initializing -> Writing -> Finished | Error
//! ```
//!
//! A partition finishes when any of the stop conditions of the job holds:
//! the wall clock passed the stop time plus leeway, every source of the
//! topic was pruned from the demultiplexer, or the stop flag was set.
//! Transport errors are counted and retried on the next poll; only a failed
//! partition assignment is terminal (`Error`), and it never stops sibling
//! partitions.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use nexwrite_core::{BrokerConsumer, PollResult};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::metrics::TRANSPORT_ERRORS;
use crate::sink::JobSink;

/// Creates one broker consumer handle per partition consumer.
#[async_trait]
pub trait ConsumerFactory: Send + Sync {
    async fn create_consumer(&self) -> nexwrite_core::Result<Box<dyn BrokerConsumer>>;
}

#[async_trait]
impl ConsumerFactory for nexwrite_core::MemoryBroker {
    async fn create_consumer(&self) -> nexwrite_core::Result<Box<dyn BrokerConsumer>> {
        Ok(Box::new(self.consumer()))
    }
}

/// Partition consumer states; `Finished` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    NotInitialized,
    Initializing,
    Writing,
    Finished,
    Error,
}

/// Consumption window and pacing knobs, shared by every partition of a job.
#[derive(Debug, Clone)]
pub struct PartitionOptions {
    /// Job start time in ms; 0 means "latest available".
    pub start_time_ms: i64,
    /// Subtracted from the start time when querying offsets by time.
    pub before_start_leeway_ms: i64,
    /// Added to the stop time for the wall-clock stop condition.
    pub after_stop_leeway_ms: i64,
    /// Bounded poll timeout; also the cancellation latency bound.
    pub poll_timeout: Duration,
    /// Offsets to step back from latest when no start time is given.
    pub latest_backoff: i64,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self {
            start_time_ms: 0,
            before_start_leeway_ms: 5_000,
            after_stop_leeway_ms: 1_000,
            poll_timeout: Duration::from_millis(500),
            latest_backoff: 0,
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Consumer group id convention: `filewriter-<host>-<pid>-<topic>-<t0>`.
/// Offsets are managed manually, so the group id only has to be unique per
/// consumer lifetime.
pub fn consumer_group_id(topic: &str) -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.to_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());
    format!("filewriter-{host}-{}-{topic}-{}", std::process::id(), now_ms())
}

/// Drives one `(topic, partition)` until a terminal state.
pub struct PartitionConsumer {
    topic: String,
    partition: u32,
    consumer: Box<dyn BrokerConsumer>,
    sink: Arc<Mutex<JobSink>>,
    stop_flag: Arc<AtomicBool>,
    stop_time_ms: Arc<AtomicI64>,
    options: PartitionOptions,
    state: PartitionState,
}

impl PartitionConsumer {
    pub fn new(
        topic: impl Into<String>,
        partition: u32,
        consumer: Box<dyn BrokerConsumer>,
        sink: Arc<Mutex<JobSink>>,
        stop_flag: Arc<AtomicBool>,
        stop_time_ms: Arc<AtomicI64>,
        options: PartitionOptions,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            consumer,
            sink,
            stop_flag,
            stop_time_ms,
            options,
            state: PartitionState::NotInitialized,
        }
    }

    /// Compute the start offset and assign the partition.
    async fn initialize(&mut self) -> nexwrite_core::Result<()> {
        let offset = if self.options.start_time_ms == 0 {
            let latest = self
                .consumer
                .latest_offset(&self.topic, self.partition)
                .await?;
            (latest - self.options.latest_backoff).max(0)
        } else {
            let from = self.options.start_time_ms - self.options.before_start_leeway_ms;
            self.consumer
                .offset_for_time(&self.topic, self.partition, from)
                .await?
        };
        self.consumer
            .assign_partition_at_offset(&self.topic, self.partition, offset)
            .await?;
        debug!(
            topic = %self.topic,
            partition = self.partition,
            offset,
            group_id = %consumer_group_id(&self.topic),
            "partition assigned"
        );
        self.state = PartitionState::Initializing;
        Ok(())
    }

    /// Stop conditions that do not depend on a message.
    async fn should_finish(&self) -> bool {
        if self.stop_flag.load(Ordering::Acquire) {
            return true;
        }
        let stop_ms = self.stop_time_ms.load(Ordering::Acquire);
        if stop_ms > 0 && now_ms() > stop_ms + self.options.after_stop_leeway_ms {
            info!(
                topic = %self.topic,
                partition = self.partition,
                "stop time plus leeway reached"
            );
            return true;
        }
        // All sources of this topic were pruned (possibly by a sibling
        // partition observing their stop timestamps).
        self.sink.lock().await.sources_remaining(&self.topic) == 0
    }

    /// Run to a terminal state. Consumes the consumer handle; returning
    /// releases it.
    pub async fn run(mut self) -> PartitionState {
        if let Err(e) = self.initialize().await {
            warn!(
                topic = %self.topic,
                partition = self.partition,
                error = %e,
                "partition initialization failed"
            );
            self.state = PartitionState::Error;
            return self.state;
        }
        loop {
            if self.should_finish().await {
                self.state = PartitionState::Finished;
                break;
            }
            match self.consumer.poll(self.options.poll_timeout).await {
                PollResult::Message(envelope) => {
                    self.state = PartitionState::Writing;
                    let outcome = {
                        let mut sink = self.sink.lock().await;
                        sink.dispatch(&self.topic, &envelope)
                    };
                    if outcome == crate::demux::ProcessOutcome::SourceCompleted {
                        debug!(
                            topic = %self.topic,
                            partition = self.partition,
                            "source completed, re-evaluating stop conditions"
                        );
                    }
                }
                PollResult::Empty | PollResult::EndOfPartition | PollResult::TimedOut => {
                    if self.state == PartitionState::Initializing {
                        self.state = PartitionState::Writing;
                    }
                }
                PollResult::Error(e) => {
                    TRANSPORT_ERRORS.with_label_values(&[self.topic.as_str()]).inc();
                    warn!(
                        topic = %self.topic,
                        partition = self.partition,
                        error = %e,
                        "transport error, retrying on next poll"
                    );
                }
            }
        }
        info!(
            topic = %self.topic,
            partition = self.partition,
            state = ?self.state,
            "partition consumer done"
        );
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexwrite_core::wire::{self, LogData, LogValue};
    use nexwrite_core::MemoryBroker;
    use nexwrite_file::{assemble, NexusFile};
    use nexwrite_modules::ModuleRegistry;
    use serde_json::json;

    async fn sink_for_topic(dir: &tempfile::TempDir, topic: &str, stop_ns: u64) -> Arc<Mutex<JobSink>> {
        let file = NexusFile::create_exclusive(dir.path().join("t.nxs")).unwrap();
        let template = json!({"children": [
            {"type": "group", "name": "entry", "children": [
                {"type": "stream", "stream":
                    {"topic": topic, "source": "S", "writer_module": "f142", "type": "double"}}
            ]}
        ]});
        let assembled = assemble(&file, &template).unwrap();
        let registry = Arc::new(ModuleRegistry::with_default_modules());
        Arc::new(Mutex::new(
            crate::sink::build_sink(file, assembled, &registry, 0, stop_ns).unwrap(),
        ))
    }

    fn log_payload(source: &str, timestamp_ns: u64, value: f64) -> bytes::Bytes {
        wire::encode_log(&LogData {
            source_name: source.to_string(),
            timestamp_ns,
            value: LogValue::Double(value),
        })
    }

    #[test]
    fn test_consumer_group_id_shape() {
        let id = consumer_group_id("motion");
        assert!(id.starts_with("filewriter-"));
        assert!(id.contains("-motion-"));
        assert!(id.contains(&format!("-{}-", std::process::id())));
    }

    #[tokio::test]
    async fn test_stop_flag_finishes_partition() {
        let dir = tempfile::tempdir().unwrap();
        let broker = MemoryBroker::new();
        broker.create_topic("T", 1).await;
        let sink = sink_for_topic(&dir, "T", 0).await;
        let stop_flag = Arc::new(AtomicBool::new(true));
        let consumer = PartitionConsumer::new(
            "T",
            0,
            Box::new(broker.consumer()),
            sink,
            stop_flag,
            Arc::new(AtomicI64::new(0)),
            PartitionOptions::default(),
        );
        assert_eq!(consumer.run().await, PartitionState::Finished);
    }

    #[tokio::test]
    async fn test_missing_topic_is_error_state() {
        let dir = tempfile::tempdir().unwrap();
        let broker = MemoryBroker::new();
        let sink = sink_for_topic(&dir, "T", 0).await;
        let consumer = PartitionConsumer::new(
            "T",
            0,
            Box::new(broker.consumer()),
            sink,
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicI64::new(0)),
            PartitionOptions::default(),
        );
        assert_eq!(consumer.run().await, PartitionState::Error);
    }

    #[tokio::test]
    async fn test_historical_start_consumes_backlog() {
        let dir = tempfile::tempdir().unwrap();
        let broker = MemoryBroker::new();
        broker.create_topic("T", 1).await;
        // Three historical messages at known broker timestamps.
        for (i, ts_ms) in [1_000i64, 2_000, 3_000].iter().enumerate() {
            broker
                .publish_at(
                    "T",
                    0,
                    log_payload("S", (i as u64 + 1) * 1_000, i as f64),
                    *ts_ms,
                )
                .await
                .unwrap();
        }
        let sink = sink_for_topic(&dir, "T", 0).await;
        let stop_flag = Arc::new(AtomicBool::new(false));
        let options = PartitionOptions {
            start_time_ms: 1_000,
            before_start_leeway_ms: 500,
            poll_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let consumer = PartitionConsumer::new(
            "T",
            0,
            Box::new(broker.consumer()),
            sink.clone(),
            stop_flag.clone(),
            Arc::new(AtomicI64::new(0)),
            options,
        );
        let handle = tokio::spawn(consumer.run());
        // Give the consumer time to drain the backlog, then stop it.
        tokio::time::sleep(Duration::from_millis(300)).await;
        stop_flag.store(true, Ordering::Release);
        assert_eq!(handle.await.unwrap(), PartitionState::Finished);
        let sink = sink.lock().await;
        assert_eq!(
            sink.file().dataset_values("/entry/value").unwrap(),
            nexwrite_file::DatasetValues::Double(vec![0.0, 1.0, 2.0])
        );
    }

    #[tokio::test]
    async fn test_partition_finishes_when_all_sources_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let broker = MemoryBroker::new();
        broker.create_topic("T", 1).await;
        // Stop time 1000 ns; the first message is beyond it and prunes the
        // only source, which finishes the partition without a stop flag.
        broker
            .publish_at("T", 0, log_payload("S", 5_000, 1.0), 10)
            .await
            .unwrap();
        let sink = sink_for_topic(&dir, "T", 1_000).await;
        let options = PartitionOptions {
            start_time_ms: 1, // historical start so the backlog is read
            before_start_leeway_ms: 0,
            poll_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let consumer = PartitionConsumer::new(
            "T",
            0,
            Box::new(broker.consumer()),
            sink.clone(),
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicI64::new(0)),
            options,
        );
        let state = tokio::time::timeout(Duration::from_secs(5), consumer.run())
            .await
            .expect("partition should finish on its own");
        assert_eq!(state, PartitionState::Finished);
    }

    #[tokio::test]
    async fn test_wall_clock_stop_time_in_past_finishes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let broker = MemoryBroker::new();
        broker.create_topic("T", 1).await;
        let sink = sink_for_topic(&dir, "T", 1_000_000).await;
        let consumer = PartitionConsumer::new(
            "T",
            0,
            Box::new(broker.consumer()),
            sink,
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicI64::new(1)), // far in the past
            PartitionOptions {
                after_stop_leeway_ms: 0,
                ..Default::default()
            },
        );
        let state = tokio::time::timeout(Duration::from_secs(5), consumer.run())
            .await
            .expect("partition should observe the past stop time");
        assert_eq!(state, PartitionState::Finished);
    }
}

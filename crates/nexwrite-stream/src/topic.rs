//! Topic Stream
//!
//! All partition consumers of one topic within a job. Started from the
//! topic's broker metadata: one consumer handle and one task per partition.
//! The stream is finished when every partition task reached a terminal
//! state; a partition in `Error` does not stop its siblings.

use std::sync::atomic::{AtomicBool, AtomicI64};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::partition::{ConsumerFactory, PartitionConsumer, PartitionOptions, PartitionState};
use crate::sink::JobSink;

/// Bound on broker metadata queries at stream start.
const METADATA_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// The partition consumers of one topic.
pub struct TopicStream {
    topic: String,
    handles: Vec<JoinHandle<PartitionState>>,
}

impl TopicStream {
    /// Query the topic's partitions and spawn one consumer task for each.
    ///
    /// Fails when the topic is missing from the broker metadata or has no
    /// partitions; per-partition failures after this point surface as
    /// `PartitionState::Error` without failing the stream.
    pub async fn start(
        factory: &Arc<dyn ConsumerFactory>,
        topic: &str,
        sink: Arc<Mutex<JobSink>>,
        stop_flag: Arc<AtomicBool>,
        stop_time_ms: Arc<AtomicI64>,
        options: PartitionOptions,
    ) -> Result<Self> {
        let metadata_consumer = factory.create_consumer().await?;
        let present = tokio::time::timeout(METADATA_TIMEOUT, metadata_consumer.topic_present(topic))
            .await
            .unwrap_or(false);
        if !present {
            return Err(Error::Broker(nexwrite_core::Error::TopicNotFound(
                topic.to_string(),
            )));
        }
        let partitions = tokio::time::timeout(
            METADATA_TIMEOUT,
            metadata_consumer.query_topic_partitions(topic),
        )
        .await
        .map_err(|_| {
            Error::Broker(nexwrite_core::Error::Broker(format!(
                "metadata query for {topic} timed out"
            )))
        })??;
        if partitions.is_empty() {
            return Err(Error::Broker(nexwrite_core::Error::TopicNotFound(
                topic.to_string(),
            )));
        }

        let mut handles = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let consumer = factory.create_consumer().await?;
            let worker = PartitionConsumer::new(
                topic,
                partition,
                consumer,
                sink.clone(),
                stop_flag.clone(),
                stop_time_ms.clone(),
                options.clone(),
            );
            handles.push(tokio::spawn(worker.run()));
        }
        info!(topic, partitions = handles.len(), "topic stream started");
        Ok(Self {
            topic: topic.to_string(),
            handles,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether every partition task reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.handles.iter().all(JoinHandle::is_finished)
    }

    /// Await every partition; returns their terminal states.
    pub async fn join(self) -> Vec<PartitionState> {
        let mut states = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(state) => states.push(state),
                Err(e) => {
                    warn!(topic = %self.topic, error = %e, "partition task panicked");
                    states.push(PartitionState::Error);
                }
            }
        }
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexwrite_core::MemoryBroker;
    use nexwrite_file::{assemble, NexusFile};
    use nexwrite_modules::ModuleRegistry;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    async fn test_sink(dir: &tempfile::TempDir) -> Arc<Mutex<JobSink>> {
        let file = NexusFile::create_exclusive(dir.path().join("t.nxs")).unwrap();
        let template = json!({"children": [
            {"type": "group", "name": "entry", "children": [
                {"type": "stream", "stream":
                    {"topic": "T", "source": "S", "writer_module": "f142", "type": "double"}}
            ]}
        ]});
        let assembled = assemble(&file, &template).unwrap();
        let registry = Arc::new(ModuleRegistry::with_default_modules());
        Arc::new(Mutex::new(
            crate::sink::build_sink(file, assembled, &registry, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_missing_topic_fails_stream_start() {
        let dir = tempfile::tempdir().unwrap();
        let broker = MemoryBroker::new();
        let factory: Arc<dyn ConsumerFactory> = Arc::new(broker);
        let sink = test_sink(&dir).await;
        let result = TopicStream::start(
            &factory,
            "T",
            sink,
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicI64::new(0)),
            PartitionOptions::default(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_one_task_per_partition_and_stop_joins_all() {
        let dir = tempfile::tempdir().unwrap();
        let broker = MemoryBroker::new();
        broker.create_topic("T", 3).await;
        let factory: Arc<dyn ConsumerFactory> = Arc::new(broker);
        let sink = test_sink(&dir).await;
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stream = TopicStream::start(
            &factory,
            "T",
            sink,
            stop_flag.clone(),
            Arc::new(AtomicI64::new(0)),
            PartitionOptions {
                poll_timeout: std::time::Duration::from_millis(20),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(!stream.is_done());
        stop_flag.store(true, Ordering::Release);
        let states = stream.join().await;
        assert_eq!(states.len(), 3);
        assert!(states.iter().all(|s| *s == PartitionState::Finished));
    }
}

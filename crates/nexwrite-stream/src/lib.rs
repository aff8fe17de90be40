//! Stream Orchestration
//!
//! Everything between a running job and its broker partitions:
//!
//! - [`TopicDemux`] routes envelopes to per-source writer modules
//! - [`JobSink`] serializes every write of one job behind a single lock,
//!   owning the file and all topic demultiplexers
//! - [`PartitionConsumer`] polls one `(topic, partition)` through its state
//!   machine, honouring start offsets, stop times, and the stop flag
//! - [`TopicStream`] groups the partition consumers of one topic
//! - [`StreamOrchestrator`] owns everything for one job: it starts the
//!   topic streams, drives the flush cadence, finalizes the file exactly
//!   once, and reports [`StreamMasterInfo`]
//!
//! Per-message problems (bad payloads, unknown schemas, write rejections)
//! are classified, counted, and never abort a partition; partition-level
//! failures never abort sibling partitions.

pub mod demux;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod partition;
pub mod sink;
pub mod source;
pub mod topic;

pub use demux::{ProcessOutcome, TopicDemux};
pub use error::{Error, Result};
pub use orchestrator::{JobOptions, StreamMasterInfo, StreamOrchestrator};
pub use partition::{
    consumer_group_id, ConsumerFactory, PartitionConsumer, PartitionOptions, PartitionState,
};
pub use sink::{build_sink, JobSink};
pub use source::{Source, SourceStats, SourceWrite};
pub use topic::TopicStream;

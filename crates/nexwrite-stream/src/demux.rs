//! Topic Demultiplexer
//!
//! Routes each consumed envelope to the writer module bound for its
//! `(source_name, schema_tag)` key, or classifies why it could not be
//! routed. Every outcome is non-fatal and counted per topic.
//!
//! The demultiplexer also owns the job's time window for its topic: messages
//! before the start time are silently filtered, and a message beyond the
//! stop time prunes its source (`SourceCompleted`). When the last source of
//! a topic is pruned the topic's partitions can finish without waiting for
//! the wall clock.

use std::collections::HashMap;
use std::sync::Arc;

use nexwrite_core::{source_hash, Envelope};
use nexwrite_modules::ModuleRegistry;
use serde::Serialize;
use tracing::{debug, warn};

use crate::metrics::MESSAGES_PROCESSED;
use crate::source::{Source, SourceStats, SourceWrite};

/// Classified result of one demultiplex step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Message appended by a writer module.
    Processed,
    /// Payload too short or structurally invalid.
    BadPayload,
    /// No payload reader registered for the schema tag.
    UnknownSchema,
    /// No source bound for the `(source_name, schema_tag)` key.
    UnknownSource,
    /// Payload timestamp is zero.
    MissingTimestamp,
    /// Before the start time, or a repeated timestamp; silently dropped.
    Filtered,
    /// Beyond the stop time; the source was pruned.
    SourceCompleted,
    /// The writer module rejected the payload.
    WriteFailed,
}

impl ProcessOutcome {
    /// Metric label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            ProcessOutcome::Processed => "processed",
            ProcessOutcome::BadPayload => "bad_payload",
            ProcessOutcome::UnknownSchema => "unknown_schema",
            ProcessOutcome::UnknownSource => "unknown_source",
            ProcessOutcome::MissingTimestamp => "missing_timestamp",
            ProcessOutcome::Filtered => "filtered",
            ProcessOutcome::SourceCompleted => "source_completed",
            ProcessOutcome::WriteFailed => "write_failed",
        }
    }
}

/// Per-topic counters, published with the job status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TopicStats {
    pub messages_processed: u64,
    pub messages_dropped: u64,
    pub sources: Vec<SourceStats>,
}

/// Routes envelopes of one topic to their sources.
pub struct TopicDemux {
    topic: String,
    registry: Arc<ModuleRegistry>,
    sources: HashMap<u64, Source>,
    start_time_ns: u64,
    stop_time_ns: u64,
    messages_processed: u64,
    messages_dropped: u64,
}

impl TopicDemux {
    /// `stop_time_ns == 0` means "run until explicitly stopped".
    pub fn new(
        topic: impl Into<String>,
        registry: Arc<ModuleRegistry>,
        start_time_ns: u64,
        stop_time_ns: u64,
    ) -> Self {
        Self {
            topic: topic.into(),
            registry,
            sources: HashMap::new(),
            start_time_ns,
            stop_time_ns,
            messages_processed: 0,
            messages_dropped: 0,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Bind a source. Returns false (and drops the source) if the key is
    /// already bound; within a job at most one source exists per key.
    pub fn add_source(&mut self, source: Source) -> bool {
        let hash = source.hash();
        if self.sources.contains_key(&hash) {
            return false;
        }
        self.sources.insert(hash, source);
        true
    }

    /// Sources still accepting messages.
    pub fn sources_remaining(&self) -> usize {
        self.sources.len()
    }

    /// Reschedule the absolute stop time.
    pub fn set_stop_time(&mut self, stop_time_ns: u64) {
        self.stop_time_ns = stop_time_ns;
    }

    pub fn stop_time_ns(&self) -> u64 {
        self.stop_time_ns
    }

    /// Route one envelope. Never fails; the outcome says what happened.
    pub fn process(&mut self, envelope: &Envelope) -> ProcessOutcome {
        let outcome = self.route(envelope);
        MESSAGES_PROCESSED
            .with_label_values(&[self.topic.as_str(), outcome.label()])
            .inc();
        match outcome {
            ProcessOutcome::Processed => self.messages_processed += 1,
            ProcessOutcome::SourceCompleted => {}
            _ => self.messages_dropped += 1,
        }
        outcome
    }

    fn route(&mut self, envelope: &Envelope) -> ProcessOutcome {
        let tag = match envelope.schema_tag() {
            Ok(tag) => tag,
            Err(_) => return ProcessOutcome::BadPayload,
        };
        let reader = match self.registry.reader(tag) {
            Some(reader) => reader,
            None => {
                warn!(
                    topic = %self.topic,
                    schema = %String::from_utf8_lossy(&tag),
                    "dropping message with unknown schema"
                );
                return ProcessOutcome::UnknownSchema;
            }
        };
        let (source_name, timestamp_ns) = match (
            reader.source_name(&envelope.payload),
            reader.timestamp_ns(&envelope.payload),
        ) {
            (Ok(name), Ok(ts)) => (name, ts),
            _ => return ProcessOutcome::BadPayload,
        };
        if timestamp_ns == 0 {
            return ProcessOutcome::MissingTimestamp;
        }
        let hash = source_hash(&source_name, tag);
        if !self.sources.contains_key(&hash) {
            debug!(
                topic = %self.topic,
                source = %source_name,
                "message for unconfigured source"
            );
            return ProcessOutcome::UnknownSource;
        }
        if timestamp_ns < self.start_time_ns {
            return ProcessOutcome::Filtered;
        }
        if self.stop_time_ns > 0 && timestamp_ns > self.stop_time_ns {
            if let Some(mut completed) = self.sources.remove(&hash) {
                completed.flush();
                completed.close();
                debug!(
                    topic = %self.topic,
                    source = %completed.source_name(),
                    "source reached its stop time"
                );
            }
            return ProcessOutcome::SourceCompleted;
        }
        match self.sources.get_mut(&hash).map(|s| s.write(envelope, timestamp_ns)) {
            Some(SourceWrite::Written(_)) => ProcessOutcome::Processed,
            Some(SourceWrite::RepeatedDropped) => ProcessOutcome::Filtered,
            Some(SourceWrite::Failed(e)) => {
                warn!(
                    topic = %self.topic,
                    source = %source_name,
                    error = %e,
                    "writer module rejected message"
                );
                ProcessOutcome::WriteFailed
            }
            None => ProcessOutcome::UnknownSource,
        }
    }

    /// Flush every writer module (best effort).
    pub fn flush_sources(&mut self) {
        for source in self.sources.values_mut() {
            source.flush();
        }
    }

    /// Close every writer module, releasing dataset handles.
    pub fn close_sources(&mut self) {
        for source in self.sources.values_mut() {
            source.close();
        }
    }

    pub fn stats(&self) -> TopicStats {
        TopicStats {
            messages_processed: self.messages_processed,
            messages_dropped: self.messages_dropped,
            sources: self.sources.values().map(Source::stats).collect(),
        }
    }
}

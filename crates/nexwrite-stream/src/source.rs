//! Source
//!
//! The binding of `(topic, source_name, schema_tag)` to a live writer-module
//! instance within one job, plus its filter statistics. Within a job at most
//! one source exists per key; the demultiplexer enforces that at binding
//! time.

use nexwrite_core::{Envelope, SchemaTag, SourceKey};
use nexwrite_modules::{ModuleError, WriteResult, WriterModule};
use serde::Serialize;

/// Outcome of handing one envelope to a source.
#[derive(Debug)]
pub enum SourceWrite {
    /// The writer module appended the message.
    Written(WriteResult),
    /// Dropped: same timestamp as the previous message and the module does
    /// not accept repeats.
    RepeatedDropped,
    /// The writer module rejected the payload; the module stays up.
    Failed(ModuleError),
}

/// Per-source filter statistics, published with the job status.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SourceStats {
    pub source_name: String,
    pub messages_written: u64,
    pub messages_discarded: u64,
    pub repeated_timestamps: u64,
    pub unordered_timestamps: u64,
    pub last_timestamp_ns: u64,
}

/// A producer identity bound to a writer module.
pub struct Source {
    topic: String,
    source_name: String,
    schema_tag: SchemaTag,
    writer: Box<dyn WriterModule>,
    messages_written: u64,
    messages_discarded: u64,
    repeated_timestamps: u64,
    unordered_timestamps: u64,
    last_timestamp_ns: u64,
}

impl Source {
    pub fn new(
        topic: impl Into<String>,
        source_name: impl Into<String>,
        schema_tag: SchemaTag,
        writer: Box<dyn WriterModule>,
    ) -> Self {
        Self {
            topic: topic.into(),
            source_name: source_name.into(),
            schema_tag,
            writer,
            messages_written: 0,
            messages_discarded: 0,
            repeated_timestamps: 0,
            unordered_timestamps: 0,
            last_timestamp_ns: 0,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn schema_tag(&self) -> SchemaTag {
        self.schema_tag
    }

    /// Demultiplex key hash for this source.
    pub fn hash(&self) -> u64 {
        SourceKey::new(self.source_name.clone(), self.schema_tag).hash()
    }

    /// Hand one envelope to the writer module, maintaining the repeated and
    /// unordered timestamp statistics.
    pub fn write(&mut self, envelope: &Envelope, timestamp_ns: u64) -> SourceWrite {
        if timestamp_ns == self.last_timestamp_ns
            && self.last_timestamp_ns != 0
            && !self.writer.accepts_repeated_timestamps()
        {
            self.repeated_timestamps += 1;
            self.messages_discarded += 1;
            return SourceWrite::RepeatedDropped;
        }
        if timestamp_ns < self.last_timestamp_ns {
            self.unordered_timestamps += 1;
        }
        self.last_timestamp_ns = timestamp_ns;
        match self.writer.write(envelope) {
            Ok(result) => {
                self.messages_written += 1;
                SourceWrite::Written(result)
            }
            Err(e) => {
                self.messages_discarded += 1;
                SourceWrite::Failed(e)
            }
        }
    }

    /// Flush the writer module (best effort).
    pub fn flush(&mut self) {
        self.writer.flush();
    }

    /// Release the writer module's dataset handles.
    pub fn close(&mut self) {
        self.writer.close();
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            source_name: self.source_name.clone(),
            messages_written: self.messages_written,
            messages_discarded: self.messages_discarded,
            repeated_timestamps: self.repeated_timestamps,
            unordered_timestamps: self.unordered_timestamps,
            last_timestamp_ns: self.last_timestamp_ns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use nexwrite_core::TimestampType;
    use nexwrite_file::Group;
    use serde_json::Value;

    /// Writer double that records call counts and can be told to fail.
    struct ProbeWriter {
        accepts_repeats: bool,
        fail_writes: bool,
        writes: usize,
    }

    impl WriterModule for ProbeWriter {
        fn parse_config(&mut self, _config: &Value) -> nexwrite_modules::contract::Result<()> {
            Ok(())
        }
        fn init(
            &mut self,
            _group: &Group,
            _attributes: Option<&Value>,
        ) -> nexwrite_modules::contract::Result<()> {
            Ok(())
        }
        fn reopen(&mut self, _group: &Group) -> nexwrite_modules::contract::Result<()> {
            Ok(())
        }
        fn write(
            &mut self,
            _envelope: &Envelope,
        ) -> nexwrite_modules::contract::Result<WriteResult> {
            if self.fail_writes {
                return Err(ModuleError::WriteError("probe failure".to_string()));
            }
            self.writes += 1;
            Ok(WriteResult {
                written_bytes: 8,
                ix0: (self.writes - 1) as u64,
            })
        }
        fn flush(&mut self) {}
        fn close(&mut self) {}
        fn accepts_repeated_timestamps(&self) -> bool {
            self.accepts_repeats
        }
    }

    fn envelope() -> Envelope {
        Envelope::new(Bytes::from_static(b"payloads"), 0, 0, TimestampType::CreateTime)
    }

    fn probe_source(accepts_repeats: bool, fail_writes: bool) -> Source {
        Source::new(
            "T",
            "s",
            *b"f142",
            Box::new(ProbeWriter {
                accepts_repeats,
                fail_writes,
                writes: 0,
            }),
        )
    }

    #[test]
    fn test_write_updates_stats() {
        let mut source = probe_source(false, false);
        assert!(matches!(source.write(&envelope(), 100), SourceWrite::Written(_)));
        assert!(matches!(source.write(&envelope(), 200), SourceWrite::Written(_)));
        let stats = source.stats();
        assert_eq!(stats.messages_written, 2);
        assert_eq!(stats.last_timestamp_ns, 200);
        assert_eq!(stats.repeated_timestamps, 0);
    }

    #[test]
    fn test_repeated_timestamp_dropped() {
        let mut source = probe_source(false, false);
        source.write(&envelope(), 100);
        assert!(matches!(
            source.write(&envelope(), 100),
            SourceWrite::RepeatedDropped
        ));
        let stats = source.stats();
        assert_eq!(stats.messages_written, 1);
        assert_eq!(stats.repeated_timestamps, 1);
        assert_eq!(stats.messages_discarded, 1);
    }

    #[test]
    fn test_repeated_timestamp_accepted_when_module_allows() {
        let mut source = probe_source(true, false);
        source.write(&envelope(), 100);
        assert!(matches!(
            source.write(&envelope(), 100),
            SourceWrite::Written(_)
        ));
        assert_eq!(source.stats().messages_written, 2);
    }

    #[test]
    fn test_unordered_timestamp_counted_but_written() {
        let mut source = probe_source(false, false);
        source.write(&envelope(), 200);
        assert!(matches!(
            source.write(&envelope(), 100),
            SourceWrite::Written(_)
        ));
        let stats = source.stats();
        assert_eq!(stats.unordered_timestamps, 1);
        assert_eq!(stats.messages_written, 2);
        assert_eq!(stats.last_timestamp_ns, 100);
    }

    #[test]
    fn test_failed_write_keeps_module_up() {
        let mut source = probe_source(false, true);
        assert!(matches!(source.write(&envelope(), 1), SourceWrite::Failed(_)));
        assert!(matches!(source.write(&envelope(), 2), SourceWrite::Failed(_)));
        assert_eq!(source.stats().messages_discarded, 2);
    }

    #[test]
    fn test_hash_matches_source_key() {
        let source = probe_source(false, false);
        assert_eq!(source.hash(), SourceKey::new("s", *b"f142").hash());
    }
}

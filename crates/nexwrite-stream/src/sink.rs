//! Per-Job Message Sink
//!
//! One `JobSink` per job, behind one `tokio::sync::Mutex`. Every partition
//! consumer of the job locks it to dispatch a message, the orchestrator
//! locks it to flush and finalize, and that single lock is the invariant
//! that keeps the job single-writer to its file.
//!
//! `build_sink` performs the stream binding of a new job: it takes the
//! stream placeholders the template walk collected, instantiates the writer
//! module each one names, initializes it on its group, and registers the
//! resulting source with the demultiplexer of its topic. Failures skip the
//! stream; a job where nothing bound at all is refused.

use std::collections::HashMap;
use std::sync::Arc;

use nexwrite_core::{Envelope, SchemaTag};
use nexwrite_file::{AssembledTemplate, NexusFile, PendingLink, StreamPlaceholder};
use nexwrite_modules::ModuleRegistry;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::demux::{ProcessOutcome, TopicDemux, TopicStats};
use crate::error::{Error, Result};
use crate::metrics::FILE_FLUSHES;
use crate::source::Source;

/// The file and demultiplexers of one job, mutated only under the job lock.
pub struct JobSink {
    file: NexusFile,
    demuxes: HashMap<String, TopicDemux>,
    links: Vec<PendingLink>,
    finalized: bool,
}

impl JobSink {
    pub fn new(file: NexusFile, links: Vec<PendingLink>) -> Self {
        Self {
            file,
            demuxes: HashMap::new(),
            links,
            finalized: false,
        }
    }

    pub fn add_demux(&mut self, demux: TopicDemux) {
        self.demuxes.insert(demux.topic().to_string(), demux);
    }

    /// Topics with at least one bound source.
    pub fn topics(&self) -> Vec<String> {
        self.demuxes.keys().cloned().collect()
    }

    /// Route one envelope of `topic`.
    pub fn dispatch(&mut self, topic: &str, envelope: &Envelope) -> ProcessOutcome {
        match self.demuxes.get_mut(topic) {
            Some(demux) => demux.process(envelope),
            None => ProcessOutcome::UnknownSource,
        }
    }

    /// Sources of `topic` still accepting messages.
    pub fn sources_remaining(&self, topic: &str) -> usize {
        self.demuxes
            .get(topic)
            .map(TopicDemux::sources_remaining)
            .unwrap_or(0)
    }

    /// Reschedule the stop time on every topic.
    pub fn set_stop_time(&mut self, stop_time_ns: u64) {
        for demux in self.demuxes.values_mut() {
            demux.set_stop_time(stop_time_ns);
        }
    }

    /// Periodic flush: writer modules first, then the file.
    pub fn flush(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        for demux in self.demuxes.values_mut() {
            demux.flush_sources();
        }
        self.file.flush()?;
        FILE_FLUSHES.inc();
        Ok(())
    }

    /// Termination: close every writer module, resolve links, close the
    /// file. Safe to call more than once; the file closes exactly once.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        for demux in self.demuxes.values_mut() {
            demux.flush_sources();
            demux.close_sources();
        }
        nexwrite_file::resolve_links(&self.file, &self.links);
        self.file.close()?;
        self.finalized = true;
        info!(file = %self.file.path().display(), "file finalized");
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn stats(&self) -> HashMap<String, TopicStats> {
        self.demuxes
            .iter()
            .map(|(topic, demux)| (topic.clone(), demux.stats()))
            .collect()
    }

    pub fn file(&self) -> &NexusFile {
        &self.file
    }
}

/// Module ids double as schema tags; a module id that is not 4 bytes cannot
/// be routed.
fn schema_tag_for(module_id: &str) -> Option<SchemaTag> {
    let bytes = module_id.as_bytes();
    if bytes.len() != 4 {
        return None;
    }
    let mut tag = [0u8; 4];
    tag.copy_from_slice(bytes);
    Some(tag)
}

fn bind_placeholder(
    file: &NexusFile,
    placeholder: &StreamPlaceholder,
    registry: &Arc<ModuleRegistry>,
    demuxes: &mut HashMap<String, TopicDemux>,
    start_time_ns: u64,
    stop_time_ns: u64,
) -> Result<()> {
    let config = &placeholder.config;
    let topic = config
        .get("topic")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Module(nexwrite_modules::ModuleError::ConfigInvalid(
            "stream without a topic".to_string(),
        )))?;
    let source_name = config
        .get("source")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Module(nexwrite_modules::ModuleError::ConfigInvalid(
            "stream without a source".to_string(),
        )))?;
    let module_id = config
        .get("writer_module")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Module(nexwrite_modules::ModuleError::ConfigInvalid(
            "stream without a writer_module".to_string(),
        )))?;
    let schema_tag = schema_tag_for(module_id).ok_or_else(|| {
        Error::Module(nexwrite_modules::ModuleError::ConfigInvalid(format!(
            "writer_module id {module_id:?} is not a 4-byte schema tag"
        )))
    })?;

    let mut writer = registry.create_module(module_id)?;
    writer.parse_config(config)?;
    let group = file.lookup_group(&placeholder.hdf_path)?;
    writer.init(&group, config.get("attributes"))?;

    let demux = demuxes.entry(topic.to_string()).or_insert_with(|| {
        TopicDemux::new(topic, registry.clone(), start_time_ns, stop_time_ns)
    });
    let source = Source::new(topic, source_name, schema_tag, writer);
    if !demux.add_source(source) {
        return Err(Error::DuplicateSource {
            topic: topic.to_string(),
            source_name: source_name.to_string(),
            schema: module_id.to_string(),
        });
    }
    debug!(
        topic,
        source = source_name,
        module = module_id,
        hdf_path = %placeholder.hdf_path,
        "bound stream"
    );
    Ok(())
}

/// Bind every stream placeholder of a freshly assembled job.
///
/// Binding failures are logged per stream and skipped; a job with zero
/// bound streams is refused with `NoUsableStreams`.
pub fn build_sink(
    file: NexusFile,
    assembled: AssembledTemplate,
    registry: &Arc<ModuleRegistry>,
    start_time_ns: u64,
    stop_time_ns: u64,
) -> Result<JobSink> {
    let mut demuxes = HashMap::new();
    let mut bound = 0usize;
    for placeholder in &assembled.placeholders {
        match bind_placeholder(
            &file,
            placeholder,
            registry,
            &mut demuxes,
            start_time_ns,
            stop_time_ns,
        ) {
            Ok(()) => bound += 1,
            Err(e) => {
                warn!(
                    hdf_path = %placeholder.hdf_path,
                    error = %e,
                    "stream binding failed, continuing with remaining streams"
                );
            }
        }
    }
    if bound == 0 {
        return Err(Error::NoUsableStreams);
    }
    let mut sink = JobSink::new(file, assembled.links);
    for demux in demuxes.into_values() {
        sink.add_demux(demux);
    }
    Ok(sink)
}

//! ev42 - Neutron Event Data Module
//!
//! Writes pulses of detector events into six datasets under its group:
//!
//! - `event_time_offset` (u32): per-event time of flight within the pulse
//! - `event_id` (u32): per-event detector id
//! - `event_time_zero` (u64): one pulse timestamp per message
//! - `event_index` (u32): per pulse, the row in the event arrays where that
//!   pulse's events begin
//! - `cue_timestamp_zero` / `cue_index`: sparse index at the configured
//!   byte cadence, pointing at event rows
//!
//! Pulses may legitimately repeat a timestamp (an empty pulse followed by a
//! late-arriving one), so this module accepts repeated timestamps.

use nexwrite_core::wire;
use nexwrite_core::Envelope;
use nexwrite_file::{Chunked1D, Group};
use serde_json::Value;
use tracing::debug;

use crate::contract::{
    write_group_attributes, ModuleError, PayloadReader, Result, WriteResult, WriterModule,
};

const CHUNK: usize = 64 * 1024;

/// Routing reader for ev42 payloads.
pub struct EventReader;

impl PayloadReader for EventReader {
    fn verify(&self, payload: &[u8]) -> bool {
        wire::verify(payload, wire::EV42)
    }

    fn source_name(&self, payload: &[u8]) -> Result<String> {
        wire::peek_source_name(payload).map_err(|e| ModuleError::WriteError(e.to_string()))
    }

    fn timestamp_ns(&self, payload: &[u8]) -> Result<u64> {
        wire::peek_timestamp_ns(payload).map_err(|e| ModuleError::WriteError(e.to_string()))
    }
}

struct EventDatasets {
    event_time_offset: Chunked1D<u32>,
    event_id: Chunked1D<u32>,
    event_time_zero: Chunked1D<u64>,
    event_index: Chunked1D<u32>,
    cue_timestamp_zero: Chunked1D<u64>,
    cue_index: Chunked1D<u32>,
}

/// Writer module for the `ev42` schema.
pub struct EventWriter {
    source_name: String,
    index_every_bytes: u64,
    total_written_bytes: u64,
    index_at_bytes: u64,
    ts_max: u64,
    datasets: Option<EventDatasets>,
}

impl Default for EventWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventWriter {
    pub fn new() -> Self {
        Self {
            source_name: String::new(),
            index_every_bytes: u64::MAX,
            total_written_bytes: 0,
            index_at_bytes: 0,
            ts_max: 0,
            datasets: None,
        }
    }
}

impl WriterModule for EventWriter {
    fn parse_config(&mut self, config: &Value) -> Result<()> {
        if let Some(source) = config.get("source").and_then(Value::as_str) {
            self.source_name = source.to_string();
        }
        let indices = config.pointer("/nexus/indices");
        if let Some(kb) = indices
            .and_then(|i| i.get("index_every_kb"))
            .and_then(Value::as_u64)
        {
            self.index_every_bytes = kb * 1024;
        }
        if let Some(mb) = indices
            .and_then(|i| i.get("index_every_mb"))
            .and_then(Value::as_u64)
        {
            self.index_every_bytes = mb * 1024 * 1024;
        }
        debug!(
            source = %self.source_name,
            index_every_bytes = self.index_every_bytes,
            "parsed ev42 stream config"
        );
        Ok(())
    }

    fn init(&mut self, group: &Group, attributes: Option<&Value>) -> Result<()> {
        if self.datasets.is_some() {
            return Err(ModuleError::AlreadyInitialized);
        }
        self.datasets = Some(EventDatasets {
            event_time_offset: group.create_chunked_1d("event_time_offset", CHUNK)?,
            event_id: group.create_chunked_1d("event_id", CHUNK)?,
            event_time_zero: group.create_chunked_1d("event_time_zero", CHUNK)?,
            event_index: group.create_chunked_1d("event_index", CHUNK)?,
            cue_timestamp_zero: group.create_chunked_1d("cue_timestamp_zero", CHUNK)?,
            cue_index: group.create_chunked_1d("cue_index", CHUNK)?,
        });
        write_group_attributes(group, attributes);
        Ok(())
    }

    fn reopen(&mut self, group: &Group) -> Result<()> {
        if self.datasets.is_some() {
            return Err(ModuleError::AlreadyInitialized);
        }
        self.datasets = Some(EventDatasets {
            event_time_offset: group.open_chunked_1d("event_time_offset")?,
            event_id: group.open_chunked_1d("event_id")?,
            event_time_zero: group.open_chunked_1d("event_time_zero")?,
            event_index: group.open_chunked_1d("event_index")?,
            cue_timestamp_zero: group.open_chunked_1d("cue_timestamp_zero")?,
            cue_index: group.open_chunked_1d("cue_index")?,
        });
        Ok(())
    }

    fn write(&mut self, envelope: &Envelope) -> Result<WriteResult> {
        let datasets = self.datasets.as_ref().ok_or(ModuleError::NotInitialized)?;
        let data = wire::decode_events(&envelope.payload)
            .map_err(|e| ModuleError::WriteError(e.to_string()))?;
        let event_count = data.time_of_flight.len();
        let first_event_row = datasets.event_time_offset.append(&data.time_of_flight)?;
        datasets.event_id.append(&data.detector_id)?;
        let pulse_row = datasets.event_time_zero.append(&[data.pulse_time_ns])?;
        datasets.event_index.append(&[first_event_row as u32])?;

        let written_bytes = event_count * 8;
        self.total_written_bytes += written_bytes as u64;
        self.ts_max = self.ts_max.max(data.pulse_time_ns);
        if self.total_written_bytes - self.index_at_bytes >= self.index_every_bytes {
            datasets.cue_timestamp_zero.append(&[self.ts_max])?;
            datasets.cue_index.append(&[first_event_row as u32])?;
            self.index_at_bytes = self.total_written_bytes;
        }
        Ok(WriteResult {
            written_bytes,
            ix0: pulse_row,
        })
    }

    fn flush(&mut self) {}

    fn close(&mut self) {
        self.datasets = None;
    }

    fn accepts_repeated_timestamps(&self) -> bool {
        true
    }
}

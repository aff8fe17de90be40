//! f142 - Sampled Log Data Module
//!
//! Writes slow-control samples (temperatures, motor positions, setpoints)
//! into four datasets under its group:
//!
//! - `value`: the samples, in the configured element type; scalar streams
//!   use a 1-D dataset, array streams (`array_size > 0`) a 2-D one
//! - `time`: sample timestamps in nanoseconds (u64)
//! - `cue_timestamp_zero` / `cue_index`: a sparse index appended whenever
//!   `index_every_bytes` of sample data have been written since the last cue
//!
//! The cue timestamp is the running maximum of the timestamps seen, which
//! keeps the cue sequence non-decreasing even when samples arrive slightly
//! out of order.

use nexwrite_core::wire::{self, LogValue};
use nexwrite_core::Envelope;
use nexwrite_file::{Chunked1D, Chunked2D, Group};
use serde_json::Value;
use tracing::debug;

use crate::contract::{
    write_group_attributes, ModuleError, PayloadReader, Result, WriteResult, WriterModule,
};

const CHUNK: usize = 64 * 1024;

/// Routing reader for f142 payloads.
pub struct LogReader;

impl PayloadReader for LogReader {
    fn verify(&self, payload: &[u8]) -> bool {
        wire::verify(payload, wire::F142)
    }

    fn source_name(&self, payload: &[u8]) -> Result<String> {
        wire::peek_source_name(payload).map_err(|e| ModuleError::WriteError(e.to_string()))
    }

    fn timestamp_ns(&self, payload: &[u8]) -> Result<u64> {
        wire::peek_timestamp_ns(payload).map_err(|e| ModuleError::WriteError(e.to_string()))
    }
}

/// The `value` dataset in its configured element type.
enum ValueDataset {
    UInt8(Chunked1D<u8>),
    UInt16(Chunked1D<u16>),
    UInt32(Chunked1D<u32>),
    UInt64(Chunked1D<u64>),
    Int8(Chunked1D<i8>),
    Int16(Chunked1D<i16>),
    Int32(Chunked1D<i32>),
    Int64(Chunked1D<i64>),
    Float(Chunked1D<f32>),
    Double(Chunked1D<f64>),
    ArrayUInt8(Chunked2D<u8>),
    ArrayUInt16(Chunked2D<u16>),
    ArrayUInt32(Chunked2D<u32>),
    ArrayUInt64(Chunked2D<u64>),
    ArrayInt8(Chunked2D<i8>),
    ArrayInt16(Chunked2D<i16>),
    ArrayInt32(Chunked2D<i32>),
    ArrayInt64(Chunked2D<i64>),
    ArrayFloat(Chunked2D<f32>),
    ArrayDouble(Chunked2D<f64>),
}

impl ValueDataset {
    fn create(group: &Group, type_name: &str, array_size: usize) -> Result<Self> {
        let ds = if array_size == 0 {
            match type_name {
                "uint8" => ValueDataset::UInt8(group.create_chunked_1d("value", CHUNK)?),
                "uint16" => ValueDataset::UInt16(group.create_chunked_1d("value", CHUNK)?),
                "uint32" => ValueDataset::UInt32(group.create_chunked_1d("value", CHUNK)?),
                "uint64" => ValueDataset::UInt64(group.create_chunked_1d("value", CHUNK)?),
                "int8" => ValueDataset::Int8(group.create_chunked_1d("value", CHUNK)?),
                "int16" => ValueDataset::Int16(group.create_chunked_1d("value", CHUNK)?),
                "int32" => ValueDataset::Int32(group.create_chunked_1d("value", CHUNK)?),
                "int64" => ValueDataset::Int64(group.create_chunked_1d("value", CHUNK)?),
                "float" => ValueDataset::Float(group.create_chunked_1d("value", CHUNK)?),
                "double" => ValueDataset::Double(group.create_chunked_1d("value", CHUNK)?),
                other => {
                    return Err(ModuleError::ConfigInvalid(format!(
                        "unknown value type {other:?}"
                    )))
                }
            }
        } else {
            match type_name {
                "uint8" => ValueDataset::ArrayUInt8(group.create_chunked_2d("value", array_size, CHUNK)?),
                "uint16" => ValueDataset::ArrayUInt16(group.create_chunked_2d("value", array_size, CHUNK)?),
                "uint32" => ValueDataset::ArrayUInt32(group.create_chunked_2d("value", array_size, CHUNK)?),
                "uint64" => ValueDataset::ArrayUInt64(group.create_chunked_2d("value", array_size, CHUNK)?),
                "int8" => ValueDataset::ArrayInt8(group.create_chunked_2d("value", array_size, CHUNK)?),
                "int16" => ValueDataset::ArrayInt16(group.create_chunked_2d("value", array_size, CHUNK)?),
                "int32" => ValueDataset::ArrayInt32(group.create_chunked_2d("value", array_size, CHUNK)?),
                "int64" => ValueDataset::ArrayInt64(group.create_chunked_2d("value", array_size, CHUNK)?),
                "float" => ValueDataset::ArrayFloat(group.create_chunked_2d("value", array_size, CHUNK)?),
                "double" => ValueDataset::ArrayDouble(group.create_chunked_2d("value", array_size, CHUNK)?),
                other => {
                    return Err(ModuleError::ConfigInvalid(format!(
                        "unknown value type {other:?}"
                    )))
                }
            }
        };
        Ok(ds)
    }

    fn open(group: &Group, type_name: &str, array_size: usize) -> Result<Self> {
        let ds = if array_size == 0 {
            match type_name {
                "uint8" => ValueDataset::UInt8(group.open_chunked_1d("value")?),
                "uint16" => ValueDataset::UInt16(group.open_chunked_1d("value")?),
                "uint32" => ValueDataset::UInt32(group.open_chunked_1d("value")?),
                "uint64" => ValueDataset::UInt64(group.open_chunked_1d("value")?),
                "int8" => ValueDataset::Int8(group.open_chunked_1d("value")?),
                "int16" => ValueDataset::Int16(group.open_chunked_1d("value")?),
                "int32" => ValueDataset::Int32(group.open_chunked_1d("value")?),
                "int64" => ValueDataset::Int64(group.open_chunked_1d("value")?),
                "float" => ValueDataset::Float(group.open_chunked_1d("value")?),
                "double" => ValueDataset::Double(group.open_chunked_1d("value")?),
                other => {
                    return Err(ModuleError::ConfigInvalid(format!(
                        "unknown value type {other:?}"
                    )))
                }
            }
        } else {
            match type_name {
                "uint8" => ValueDataset::ArrayUInt8(group.open_chunked_2d("value")?),
                "uint16" => ValueDataset::ArrayUInt16(group.open_chunked_2d("value")?),
                "uint32" => ValueDataset::ArrayUInt32(group.open_chunked_2d("value")?),
                "uint64" => ValueDataset::ArrayUInt64(group.open_chunked_2d("value")?),
                "int8" => ValueDataset::ArrayInt8(group.open_chunked_2d("value")?),
                "int16" => ValueDataset::ArrayInt16(group.open_chunked_2d("value")?),
                "int32" => ValueDataset::ArrayInt32(group.open_chunked_2d("value")?),
                "int64" => ValueDataset::ArrayInt64(group.open_chunked_2d("value")?),
                "float" => ValueDataset::ArrayFloat(group.open_chunked_2d("value")?),
                "double" => ValueDataset::ArrayDouble(group.open_chunked_2d("value")?),
                other => {
                    return Err(ModuleError::ConfigInvalid(format!(
                        "unknown value type {other:?}"
                    )))
                }
            }
        };
        Ok(ds)
    }

    /// Append one sample; returns `(written_bytes, ix0)`.
    fn append(&self, value: &LogValue) -> Result<(usize, u64)> {
        let bytes = value.byte_len();
        let ix0 = match (self, value) {
            (ValueDataset::UInt8(ds), LogValue::UByte(v)) => ds.append(&[*v])?,
            (ValueDataset::UInt16(ds), LogValue::UShort(v)) => ds.append(&[*v])?,
            (ValueDataset::UInt32(ds), LogValue::UInt(v)) => ds.append(&[*v])?,
            (ValueDataset::UInt64(ds), LogValue::ULong(v)) => ds.append(&[*v])?,
            (ValueDataset::Int8(ds), LogValue::Byte(v)) => ds.append(&[*v])?,
            (ValueDataset::Int16(ds), LogValue::Short(v)) => ds.append(&[*v])?,
            (ValueDataset::Int32(ds), LogValue::Int(v)) => ds.append(&[*v])?,
            (ValueDataset::Int64(ds), LogValue::Long(v)) => ds.append(&[*v])?,
            (ValueDataset::Float(ds), LogValue::Float(v)) => ds.append(&[*v])?,
            (ValueDataset::Double(ds), LogValue::Double(v)) => ds.append(&[*v])?,
            (ValueDataset::ArrayUInt8(ds), LogValue::ArrayUByte(v)) => ds.append_row(v)?,
            (ValueDataset::ArrayUInt16(ds), LogValue::ArrayUShort(v)) => ds.append_row(v)?,
            (ValueDataset::ArrayUInt32(ds), LogValue::ArrayUInt(v)) => ds.append_row(v)?,
            (ValueDataset::ArrayUInt64(ds), LogValue::ArrayULong(v)) => ds.append_row(v)?,
            (ValueDataset::ArrayInt8(ds), LogValue::ArrayByte(v)) => ds.append_row(v)?,
            (ValueDataset::ArrayInt16(ds), LogValue::ArrayShort(v)) => ds.append_row(v)?,
            (ValueDataset::ArrayInt32(ds), LogValue::ArrayInt(v)) => ds.append_row(v)?,
            (ValueDataset::ArrayInt64(ds), LogValue::ArrayLong(v)) => ds.append_row(v)?,
            (ValueDataset::ArrayFloat(ds), LogValue::ArrayFloat(v)) => ds.append_row(v)?,
            (ValueDataset::ArrayDouble(ds), LogValue::ArrayDouble(v)) => ds.append_row(v)?,
            _ => {
                return Err(ModuleError::WriteError(format!(
                    "sample of type {} does not match the configured value dataset",
                    value.type_name()
                )))
            }
        };
        Ok((bytes, ix0))
    }
}

struct LogDatasets {
    value: ValueDataset,
    time: Chunked1D<u64>,
    cue_timestamp_zero: Chunked1D<u64>,
    cue_index: Chunked1D<u64>,
}

/// Writer module for the `f142` schema.
pub struct LogWriter {
    source_name: String,
    type_name: String,
    array_size: usize,
    index_every_bytes: u64,
    total_written_bytes: u64,
    index_at_bytes: u64,
    ts_max: u64,
    datasets: Option<LogDatasets>,
}

impl Default for LogWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl LogWriter {
    pub fn new() -> Self {
        Self {
            source_name: String::new(),
            type_name: "double".to_string(),
            array_size: 0,
            index_every_bytes: u64::MAX,
            total_written_bytes: 0,
            index_at_bytes: 0,
            ts_max: 0,
            datasets: None,
        }
    }
}

impl WriterModule for LogWriter {
    fn parse_config(&mut self, config: &Value) -> Result<()> {
        if let Some(source) = config.get("source").and_then(Value::as_str) {
            self.source_name = source.to_string();
        }
        if let Some(type_name) = config.get("type").and_then(Value::as_str) {
            if ValueDataset::type_known(type_name) {
                self.type_name = type_name.to_string();
            } else {
                return Err(ModuleError::ConfigInvalid(format!(
                    "unknown value type {type_name:?}"
                )));
            }
        }
        if let Some(n) = config.get("array_size").and_then(Value::as_u64) {
            self.array_size = n as usize;
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
            value_type = %self.type_name,
            array_size = self.array_size,
            index_every_bytes = self.index_every_bytes,
            "parsed f142 stream config"
        );
        Ok(())
    }

    fn init(&mut self, group: &Group, attributes: Option<&Value>) -> Result<()> {
        if self.datasets.is_some() {
            return Err(ModuleError::AlreadyInitialized);
        }
        let value = ValueDataset::create(group, &self.type_name, self.array_size)?;
        self.datasets = Some(LogDatasets {
            value,
            time: group.create_chunked_1d("time", CHUNK)?,
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
        self.datasets = Some(LogDatasets {
            value: ValueDataset::open(group, &self.type_name, self.array_size)?,
            time: group.open_chunked_1d("time")?,
            cue_timestamp_zero: group.open_chunked_1d("cue_timestamp_zero")?,
            cue_index: group.open_chunked_1d("cue_index")?,
        });
        Ok(())
    }

    fn write(&mut self, envelope: &Envelope) -> Result<WriteResult> {
        let datasets = self.datasets.as_ref().ok_or(ModuleError::NotInitialized)?;
        let data = wire::decode_log(&envelope.payload)
            .map_err(|e| ModuleError::WriteError(e.to_string()))?;
        let (written_bytes, ix0) = datasets.value.append(&data.value)?;
        self.total_written_bytes += written_bytes as u64;
        self.ts_max = self.ts_max.max(data.timestamp_ns);
        if self.total_written_bytes - self.index_at_bytes >= self.index_every_bytes {
            datasets.cue_timestamp_zero.append(&[self.ts_max])?;
            datasets.cue_index.append(&[ix0])?;
            self.index_at_bytes = self.total_written_bytes;
        }
        datasets.time.append(&[data.timestamp_ns])?;
        Ok(WriteResult { written_bytes, ix0 })
    }

    fn flush(&mut self) {}

    fn close(&mut self) {
        self.datasets = None;
    }

    fn accepts_repeated_timestamps(&self) -> bool {
        false
    }
}

impl ValueDataset {
    fn type_known(type_name: &str) -> bool {
        matches!(
            type_name,
            "uint8"
                | "uint16"
                | "uint32"
                | "uint64"
                | "int8"
                | "int16"
                | "int32"
                | "int64"
                | "float"
                | "double"
        )
    }
}

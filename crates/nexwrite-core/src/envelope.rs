//! Message Envelope
//!
//! This module defines the `Envelope` type - a consumed broker message plus
//! the metadata the broker assigned to it.
//!
//! ## Structure
//! Each envelope contains:
//! - **payload**: The message body (arbitrary bytes, zero-copy `Bytes`)
//! - **offset**: Broker-assigned offset, monotone within a partition
//! - **timestamp_ms**: Broker-assigned wall-clock timestamp in milliseconds
//! - **timestamp_type**: How the timestamp was assigned (or that it wasn't)
//!
//! ## Schema Identification
//! Instrument payloads carry a 4-byte ASCII schema tag at bytes [4..8), the
//! file-header convention shared by all supported schemas. `schema_tag()`
//! rejects payloads shorter than 8 bytes.
//!
//! ## Lifecycle
//! An envelope is created by a partition consumer on each successful poll,
//! moved into the demultiplexer, consumed by at most one writer module, and
//! then dropped. It is immutable after construction.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A 4-byte ASCII schema identifier, e.g. `*b"f142"`.
pub type SchemaTag = [u8; 4];

/// How the broker assigned the envelope timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampType {
    /// The broker could not supply a timestamp.
    NotAvailable,
    /// Timestamp set by the producer at message creation.
    CreateTime,
    /// Timestamp set by the broker on append.
    LogAppendTime,
}

/// A consumed message with broker metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Message body.
    pub payload: Bytes,

    /// Broker-assigned offset within the partition.
    pub offset: i64,

    /// Broker-assigned timestamp in milliseconds since epoch.
    pub timestamp_ms: i64,

    /// How `timestamp_ms` was assigned.
    pub timestamp_type: TimestampType,
}

impl Envelope {
    pub fn new(
        payload: Bytes,
        offset: i64,
        timestamp_ms: i64,
        timestamp_type: TimestampType,
    ) -> Self {
        Self {
            payload,
            offset,
            timestamp_ms,
            timestamp_type,
        }
    }

    /// Extract the 4-byte schema tag at payload bytes [4..8).
    ///
    /// Returns `BadPayload` for payloads shorter than 8 bytes.
    pub fn schema_tag(&self) -> Result<SchemaTag> {
        if self.payload.len() < 8 {
            return Err(Error::BadPayload(format!(
                "payload of {} bytes is too short to carry a schema tag",
                self.payload.len()
            )));
        }
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&self.payload[4..8]);
        Ok(tag)
    }
}

/// The identity of a producer within a topic.
///
/// A source is keyed by `(source_name, schema_tag)`; within one job at most
/// one live writer module exists per `(topic, source_name, schema_tag)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    pub source_name: String,
    pub schema_tag: SchemaTag,
}

impl SourceKey {
    pub fn new(source_name: impl Into<String>, schema_tag: SchemaTag) -> Self {
        Self {
            source_name: source_name.into(),
            schema_tag,
        }
    }

    /// FNV-1a hash of the key, computed once per envelope for O(1) demux
    /// lookup.
    pub fn hash(&self) -> u64 {
        const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
        let mut h = FNV_OFFSET;
        for b in self.source_name.as_bytes() {
            h ^= u64::from(*b);
            h = h.wrapping_mul(FNV_PRIME);
        }
        for b in &self.schema_tag {
            h ^= u64::from(*b);
            h = h.wrapping_mul(FNV_PRIME);
        }
        h
    }
}

/// Hash a `(source_name, schema_tag)` pair without building a `SourceKey`.
pub fn source_hash(source_name: &str, schema_tag: SchemaTag) -> u64 {
    SourceKey {
        source_name: source_name.to_string(),
        schema_tag,
    }
    .hash()
}

//! Wire Codec
//!
//! Payload layouts for the supported instrument schemas. Every payload shares
//! a common header that places the 4-byte ASCII schema tag at bytes [4..8):
//!
//! ```text
//! [u32 payload length]  (little-endian, includes the header itself)
//! [4-byte schema tag]   ("f142" or "ev42")
//! [u16 name length][source name bytes]
//! [u64 timestamp ns]
//! [schema-specific body]
//! ```
//!
//! ## f142 - sampled log data
//! Body: `[u8 value kind][value bytes]`. Scalar kinds store the raw
//! little-endian value; array kinds store `[u32 element count][elements]`.
//!
//! ## ev42 - neutron event data
//! Body: `[u32 event count][count x u32 time-of-flight][count x u32 detector id]`.
//! The pulse time is the header timestamp.
//!
//! The header can be decoded on its own (`peek_source_name`,
//! `peek_timestamp_ns`), which is what the payload-reader registry uses to
//! route a message without a full decode.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::envelope::SchemaTag;
use crate::error::{Error, Result};

/// Schema tag for sampled log data.
pub const F142: SchemaTag = *b"f142";

/// Schema tag for neutron event data.
pub const EV42: SchemaTag = *b"ev42";

/// A sampled value carried by an f142 payload.
#[derive(Debug, Clone, PartialEq)]
pub enum LogValue {
    UByte(u8),
    UShort(u16),
    UInt(u32),
    ULong(u64),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ArrayUByte(Vec<u8>),
    ArrayUShort(Vec<u16>),
    ArrayUInt(Vec<u32>),
    ArrayULong(Vec<u64>),
    ArrayByte(Vec<i8>),
    ArrayShort(Vec<i16>),
    ArrayInt(Vec<i32>),
    ArrayLong(Vec<i64>),
    ArrayFloat(Vec<f32>),
    ArrayDouble(Vec<f64>),
}

impl LogValue {
    /// Wire ordinal of this value kind.
    fn kind(&self) -> u8 {
        match self {
            LogValue::UByte(_) => 0,
            LogValue::UShort(_) => 1,
            LogValue::UInt(_) => 2,
            LogValue::ULong(_) => 3,
            LogValue::Byte(_) => 4,
            LogValue::Short(_) => 5,
            LogValue::Int(_) => 6,
            LogValue::Long(_) => 7,
            LogValue::Float(_) => 8,
            LogValue::Double(_) => 9,
            LogValue::ArrayUByte(_) => 10,
            LogValue::ArrayUShort(_) => 11,
            LogValue::ArrayUInt(_) => 12,
            LogValue::ArrayULong(_) => 13,
            LogValue::ArrayByte(_) => 14,
            LogValue::ArrayShort(_) => 15,
            LogValue::ArrayInt(_) => 16,
            LogValue::ArrayLong(_) => 17,
            LogValue::ArrayFloat(_) => 18,
            LogValue::ArrayDouble(_) => 19,
        }
    }

    /// The config `type` string this value corresponds to.
    pub fn type_name(&self) -> &'static str {
        match self {
            LogValue::UByte(_) | LogValue::ArrayUByte(_) => "uint8",
            LogValue::UShort(_) | LogValue::ArrayUShort(_) => "uint16",
            LogValue::UInt(_) | LogValue::ArrayUInt(_) => "uint32",
            LogValue::ULong(_) | LogValue::ArrayULong(_) => "uint64",
            LogValue::Byte(_) | LogValue::ArrayByte(_) => "int8",
            LogValue::Short(_) | LogValue::ArrayShort(_) => "int16",
            LogValue::Int(_) | LogValue::ArrayInt(_) => "int32",
            LogValue::Long(_) | LogValue::ArrayLong(_) => "int64",
            LogValue::Float(_) | LogValue::ArrayFloat(_) => "float",
            LogValue::Double(_) | LogValue::ArrayDouble(_) => "double",
        }
    }

    pub fn is_array(&self) -> bool {
        self.kind() >= 10
    }

    /// Number of value bytes this sample occupies on the wire.
    pub fn byte_len(&self) -> usize {
        match self {
            LogValue::UByte(_) | LogValue::Byte(_) => 1,
            LogValue::UShort(_) | LogValue::Short(_) => 2,
            LogValue::UInt(_) | LogValue::Int(_) | LogValue::Float(_) => 4,
            LogValue::ULong(_) | LogValue::Long(_) | LogValue::Double(_) => 8,
            LogValue::ArrayUByte(v) => v.len(),
            LogValue::ArrayByte(v) => v.len(),
            LogValue::ArrayUShort(v) => v.len() * 2,
            LogValue::ArrayShort(v) => v.len() * 2,
            LogValue::ArrayUInt(v) => v.len() * 4,
            LogValue::ArrayInt(v) => v.len() * 4,
            LogValue::ArrayFloat(v) => v.len() * 4,
            LogValue::ArrayULong(v) => v.len() * 8,
            LogValue::ArrayLong(v) => v.len() * 8,
            LogValue::ArrayDouble(v) => v.len() * 8,
        }
    }
}

/// Decoded f142 payload.
#[derive(Debug, Clone, PartialEq)]
pub struct LogData {
    pub source_name: String,
    pub timestamp_ns: u64,
    pub value: LogValue,
}

/// Decoded ev42 payload. The pulse time is the header timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct EventData {
    pub source_name: String,
    pub pulse_time_ns: u64,
    pub time_of_flight: Vec<u32>,
    pub detector_id: Vec<u32>,
}

fn put_header(buf: &mut BytesMut, tag: SchemaTag, source_name: &str, timestamp_ns: u64) {
    buf.put_u32_le(0); // patched with the final length below
    buf.put_slice(&tag);
    buf.put_u16_le(source_name.len() as u16);
    buf.put_slice(source_name.as_bytes());
    buf.put_u64_le(timestamp_ns);
}

fn patch_length(buf: &mut BytesMut) {
    let len = buf.len() as u32;
    buf[0..4].copy_from_slice(&len.to_le_bytes());
}

/// Parsed common header plus the offset where the body starts.
struct Header {
    tag: SchemaTag,
    source_name: String,
    timestamp_ns: u64,
    body_at: usize,
}

fn parse_header(payload: &[u8]) -> Result<Header> {
    if payload.len() < 8 {
        return Err(Error::BadPayload(format!(
            "payload of {} bytes is too short for a header",
            payload.len()
        )));
    }
    let mut buf = payload;
    let declared = buf.get_u32_le() as usize;
    if declared != payload.len() {
        return Err(Error::BadPayload(format!(
            "declared length {} does not match payload length {}",
            declared,
            payload.len()
        )));
    }
    let mut tag = [0u8; 4];
    buf.copy_to_slice(&mut tag);
    if buf.remaining() < 2 {
        return Err(Error::BadPayload("truncated source name length".into()));
    }
    let name_len = buf.get_u16_le() as usize;
    if buf.remaining() < name_len + 8 {
        return Err(Error::BadPayload("truncated source name or timestamp".into()));
    }
    let source_name = String::from_utf8(buf[..name_len].to_vec())
        .map_err(|_| Error::BadPayload("source name is not valid UTF-8".into()))?;
    buf.advance(name_len);
    let timestamp_ns = buf.get_u64_le();
    let body_at = payload.len() - buf.remaining();
    Ok(Header {
        tag,
        source_name,
        timestamp_ns,
        body_at,
    })
}

/// Decode just the source name from any payload with the common header.
pub fn peek_source_name(payload: &[u8]) -> Result<String> {
    Ok(parse_header(payload)?.source_name)
}

/// Decode just the timestamp from any payload with the common header.
pub fn peek_timestamp_ns(payload: &[u8]) -> Result<u64> {
    Ok(parse_header(payload)?.timestamp_ns)
}

/// Cheap structural check: header parses and the tag matches.
pub fn verify(payload: &[u8], expected: SchemaTag) -> bool {
    matches!(parse_header(payload), Ok(h) if h.tag == expected)
}

/// Encode an f142 payload.
pub fn encode_log(data: &LogData) -> Bytes {
    let mut buf = BytesMut::with_capacity(32 + data.source_name.len() + data.value.byte_len());
    put_header(&mut buf, F142, &data.source_name, data.timestamp_ns);
    buf.put_u8(data.value.kind());
    match &data.value {
        LogValue::UByte(v) => buf.put_u8(*v),
        LogValue::UShort(v) => buf.put_u16_le(*v),
        LogValue::UInt(v) => buf.put_u32_le(*v),
        LogValue::ULong(v) => buf.put_u64_le(*v),
        LogValue::Byte(v) => buf.put_i8(*v),
        LogValue::Short(v) => buf.put_i16_le(*v),
        LogValue::Int(v) => buf.put_i32_le(*v),
        LogValue::Long(v) => buf.put_i64_le(*v),
        LogValue::Float(v) => buf.put_f32_le(*v),
        LogValue::Double(v) => buf.put_f64_le(*v),
        LogValue::ArrayUByte(v) => {
            buf.put_u32_le(v.len() as u32);
            buf.put_slice(v);
        }
        LogValue::ArrayUShort(v) => {
            buf.put_u32_le(v.len() as u32);
            v.iter().for_each(|x| buf.put_u16_le(*x));
        }
        LogValue::ArrayUInt(v) => {
            buf.put_u32_le(v.len() as u32);
            v.iter().for_each(|x| buf.put_u32_le(*x));
        }
        LogValue::ArrayULong(v) => {
            buf.put_u32_le(v.len() as u32);
            v.iter().for_each(|x| buf.put_u64_le(*x));
        }
        LogValue::ArrayByte(v) => {
            buf.put_u32_le(v.len() as u32);
            v.iter().for_each(|x| buf.put_i8(*x));
        }
        LogValue::ArrayShort(v) => {
            buf.put_u32_le(v.len() as u32);
            v.iter().for_each(|x| buf.put_i16_le(*x));
        }
        LogValue::ArrayInt(v) => {
            buf.put_u32_le(v.len() as u32);
            v.iter().for_each(|x| buf.put_i32_le(*x));
        }
        LogValue::ArrayLong(v) => {
            buf.put_u32_le(v.len() as u32);
            v.iter().for_each(|x| buf.put_i64_le(*x));
        }
        LogValue::ArrayFloat(v) => {
            buf.put_u32_le(v.len() as u32);
            v.iter().for_each(|x| buf.put_f32_le(*x));
        }
        LogValue::ArrayDouble(v) => {
            buf.put_u32_le(v.len() as u32);
            v.iter().for_each(|x| buf.put_f64_le(*x));
        }
    }
    patch_length(&mut buf);
    buf.freeze()
}

fn need(buf: &[u8], bytes: usize, what: &str) -> Result<()> {
    if buf.len() < bytes {
        return Err(Error::BadPayload(format!("truncated {what}")));
    }
    Ok(())
}

/// Decode an f142 payload.
pub fn decode_log(payload: &[u8]) -> Result<LogData> {
    let header = parse_header(payload)?;
    if header.tag != F142 {
        return Err(Error::BadPayload(format!(
            "expected f142 payload, found tag {:?}",
            header.tag
        )));
    }
    let mut buf = &payload[header.body_at..];
    need(buf, 1, "value kind")?;
    let kind = buf.get_u8();
    let value = match kind {
        0 => {
            need(buf, 1, "value")?;
            LogValue::UByte(buf.get_u8())
        }
        1 => {
            need(buf, 2, "value")?;
            LogValue::UShort(buf.get_u16_le())
        }
        2 => {
            need(buf, 4, "value")?;
            LogValue::UInt(buf.get_u32_le())
        }
        3 => {
            need(buf, 8, "value")?;
            LogValue::ULong(buf.get_u64_le())
        }
        4 => {
            need(buf, 1, "value")?;
            LogValue::Byte(buf.get_i8())
        }
        5 => {
            need(buf, 2, "value")?;
            LogValue::Short(buf.get_i16_le())
        }
        6 => {
            need(buf, 4, "value")?;
            LogValue::Int(buf.get_i32_le())
        }
        7 => {
            need(buf, 8, "value")?;
            LogValue::Long(buf.get_i64_le())
        }
        8 => {
            need(buf, 4, "value")?;
            LogValue::Float(buf.get_f32_le())
        }
        9 => {
            need(buf, 8, "value")?;
            LogValue::Double(buf.get_f64_le())
        }
        10..=19 => {
            need(buf, 4, "array length")?;
            let count = buf.get_u32_le() as usize;
            let elem = match kind {
                10 | 14 => 1,
                11 | 15 => 2,
                12 | 16 | 18 => 4,
                _ => 8,
            };
            need(buf, count * elem, "array elements")?;
            match kind {
                10 => LogValue::ArrayUByte((0..count).map(|_| buf.get_u8()).collect()),
                11 => LogValue::ArrayUShort((0..count).map(|_| buf.get_u16_le()).collect()),
                12 => LogValue::ArrayUInt((0..count).map(|_| buf.get_u32_le()).collect()),
                13 => LogValue::ArrayULong((0..count).map(|_| buf.get_u64_le()).collect()),
                14 => LogValue::ArrayByte((0..count).map(|_| buf.get_i8()).collect()),
                15 => LogValue::ArrayShort((0..count).map(|_| buf.get_i16_le()).collect()),
                16 => LogValue::ArrayInt((0..count).map(|_| buf.get_i32_le()).collect()),
                17 => LogValue::ArrayLong((0..count).map(|_| buf.get_i64_le()).collect()),
                18 => LogValue::ArrayFloat((0..count).map(|_| buf.get_f32_le()).collect()),
                _ => LogValue::ArrayDouble((0..count).map(|_| buf.get_f64_le()).collect()),
            }
        }
        other => {
            return Err(Error::BadPayload(format!("unknown value kind {other}")));
        }
    };
    Ok(LogData {
        source_name: header.source_name,
        timestamp_ns: header.timestamp_ns,
        value,
    })
}

/// Encode an ev42 payload.
pub fn encode_events(data: &EventData) -> Bytes {
    let count = data.time_of_flight.len().min(data.detector_id.len());
    let mut buf = BytesMut::with_capacity(32 + data.source_name.len() + count * 8);
    put_header(&mut buf, EV42, &data.source_name, data.pulse_time_ns);
    buf.put_u32_le(count as u32);
    data.time_of_flight[..count]
        .iter()
        .for_each(|x| buf.put_u32_le(*x));
    data.detector_id[..count]
        .iter()
        .for_each(|x| buf.put_u32_le(*x));
    patch_length(&mut buf);
    buf.freeze()
}

/// Decode an ev42 payload.
pub fn decode_events(payload: &[u8]) -> Result<EventData> {
    let header = parse_header(payload)?;
    if header.tag != EV42 {
        return Err(Error::BadPayload(format!(
            "expected ev42 payload, found tag {:?}",
            header.tag
        )));
    }
    let mut buf = &payload[header.body_at..];
    need(buf, 4, "event count")?;
    let count = buf.get_u32_le() as usize;
    need(buf, count * 8, "event arrays")?;
    let time_of_flight = (0..count).map(|_| buf.get_u32_le()).collect();
    let detector_id = (0..count).map(|_| buf.get_u32_le()).collect();
    Ok(EventData {
        source_name: header.source_name,
        pulse_time_ns: header.timestamp_ns,
        time_of_flight,
        detector_id,
    })
}

//! Error Types for nexwrite-core
//!
//! ## Error Categories
//!
//! ### Payload Errors
//! - `BadPayload`: the message body is too short to carry a schema tag, or
//!   a codec field is truncated
//!
//! ### Broker Errors
//! - `TopicNotFound`: topic missing from the broker metadata
//! - `PartitionNotFound`: partition id out of range for the topic
//! - `OffsetOutOfRange`: requested offset is beyond the partition log
//!
//! ## Usage
//!
//! All operations in this crate return `Result<T>` which is aliased to
//! `Result<T, Error>`, allowing `?` propagation throughout the write path.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad payload: {0}")]
    BadPayload(String),

    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Partition not found: {topic}/{partition}")]
    PartitionNotFound { topic: String, partition: u32 },

    #[error("Offset out of range: {topic}/{partition} offset {offset}")]
    OffsetOutOfRange {
        topic: String,
        partition: u32,
        offset: i64,
    },

    #[error("Broker error: {0}")]
    Broker(String),
}

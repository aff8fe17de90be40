//! Core types for nexwrite.
//!
//! This crate defines the fundamental data types shared by every other part
//! of the file writer:
//!
//! 1. **Envelope**: a consumed broker message plus its metadata
//! 2. **Schema tags and source keys**: how messages are demultiplexed
//! 3. **Wire codec**: the payload layouts of the supported schemas
//! 4. **Broker traits**: the consumer/producer capabilities the writer
//!    requires from a broker client, plus an in-memory implementation

pub mod broker;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod wire;

pub use broker::{BrokerConsumer, BrokerProducer, PollResult};
pub use envelope::{source_hash, Envelope, SchemaTag, SourceKey, TimestampType};
pub use error::{Error, Result};
pub use memory::{MemoryBroker, MemoryConsumer, MemoryProducer};

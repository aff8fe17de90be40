//! Error Types for Stream Orchestration
//!
//! ## Error Categories
//!
//! ### Job Construction
//! - `NoUsableStreams`: no stream placeholder could be bound to a writer
//!   module, so the job would never write anything
//! - `AllTopicsFailed`: every topic stream failed to start
//! - `DuplicateSource`: the template declared two streams for the same
//!   `(topic, source, schema)` within one job
//!
//! ### Wrapped Errors
//! - `File`: file backend failure (file-level, aborts the job)
//! - `Module`: writer-module failure during binding
//! - `Broker`: broker metadata failure during topic-stream start
//!
//! Per-message problems are not errors; they are [`crate::ProcessOutcome`]
//! values, counted and recovered locally.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No usable streams in job")]
    NoUsableStreams,

    #[error("All topic streams failed to start")]
    AllTopicsFailed,

    #[error("Duplicate source {source_name} with schema {schema} on topic {topic}")]
    DuplicateSource {
        topic: String,
        source_name: String,
        schema: String,
    },

    #[error("File error: {0}")]
    File(#[from] nexwrite_file::Error),

    #[error("Writer module error: {0}")]
    Module(#[from] nexwrite_modules::ModuleError),

    #[error("Broker error: {0}")]
    Broker(#[from] nexwrite_core::Error),
}

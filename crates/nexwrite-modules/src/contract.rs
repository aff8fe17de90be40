//! Writer-Module Contract
//!
//! Every writer module goes through the same lifecycle within a job:
//!
//! 1. `parse_config` with the stream's JSON configuration
//! 2. exactly one of `init` (fresh file) or `reopen` (existing file)
//! 3. any number of `write` calls, one per routed envelope
//! 4. `flush` (best effort) and `close` (must release dataset handles)
//!
//! `init` and `reopen` are mutually exclusive on a group; calling either
//! twice is an error. A module declares whether it accepts repeated
//! timestamps; the demultiplexer honours that flag when deduplicating.

use nexwrite_core::Envelope;
use nexwrite_file::Group;
use serde_json::Value;
use thiserror::Error;

/// Errors produced by writer modules and their registries.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Invalid module configuration: {0}")]
    ConfigInvalid(String),

    #[error("Module IO failure: {0}")]
    Io(String),

    #[error("Module used before init or reopen")]
    NotInitialized,

    #[error("Module already initialized on this group")]
    AlreadyInitialized,

    #[error("Write rejected: {0}")]
    WriteError(String),

    #[error("Writer module already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Unknown writer module: {0}")]
    UnknownModule(String),
}

impl From<nexwrite_file::Error> for ModuleError {
    fn from(e: nexwrite_file::Error) -> Self {
        ModuleError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ModuleError>;

/// Outcome of a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    /// Payload bytes appended to the primary dataset.
    pub written_bytes: usize,
    /// Row index of the first element this write appended.
    pub ix0: u64,
}

/// The per-source, per-schema plug-in that turns envelopes into appends.
pub trait WriterModule: Send {
    /// Parse the stream configuration. Called once, before `init`/`reopen`.
    fn parse_config(&mut self, config: &Value) -> Result<()>;

    /// Create this module's datasets under `group` and write the stream's
    /// attributes. Called exactly once on a fresh file.
    fn init(&mut self, group: &Group, attributes: Option<&Value>) -> Result<()>;

    /// Open this module's datasets under `group` for append. Called exactly
    /// once on a reopened file.
    fn reopen(&mut self, group: &Group) -> Result<()>;

    /// Append one envelope's worth of data.
    fn write(&mut self, envelope: &Envelope) -> Result<WriteResult>;

    /// Best-effort flush of buffered state.
    fn flush(&mut self);

    /// Release all dataset handles. Called exactly once at job termination,
    /// before the file is closed.
    fn close(&mut self);

    /// Whether the demultiplexer should pass through messages that repeat
    /// the previous timestamp for the same source.
    fn accepts_repeated_timestamps(&self) -> bool {
        false
    }
}

/// Extracts routing metadata from a payload without a full decode.
pub trait PayloadReader: Send + Sync {
    /// Structural validity check for this schema.
    fn verify(&self, payload: &[u8]) -> bool;

    /// The producer identity carried in the payload.
    fn source_name(&self, payload: &[u8]) -> Result<String>;

    /// The payload timestamp in nanoseconds since epoch.
    fn timestamp_ns(&self, payload: &[u8]) -> Result<u64>;
}

/// Write a stream's attribute JSON onto its group. Accepts the object form
/// (`{"units": "K"}`) and the array form (`[{"name": ..., "values": ...}]`).
pub fn write_group_attributes(group: &Group, attributes: Option<&Value>) {
    match attributes {
        None => {}
        Some(Value::Object(entries)) => {
            for (name, value) in entries {
                group.write_attribute(name, value.clone());
            }
        }
        Some(Value::Array(entries)) => {
            for entry in entries {
                let name = entry.get("name").and_then(Value::as_str);
                let values = entry.get("values").or_else(|| entry.get("value"));
                if let (Some(name), Some(values)) = (name, values) {
                    group.write_attribute(name, values.clone());
                }
            }
        }
        Some(_) => {}
    }
}

//! Writer Modules
//!
//! A writer module is the plug-in that turns messages of one schema into
//! appends on a group of the job's file. This crate defines:
//!
//! - the [`WriterModule`] contract every module implements
//! - the [`PayloadReader`] contract used to route a message to its source
//!   without a full decode
//! - the [`ModuleRegistry`] binding module ids and schema tags to both
//! - the two shipped modules: `f142` (sampled log data) and `ev42`
//!   (neutron event data)
//!
//! Registries are plain values owned by the master and handed to each job,
//! not global singletons; construction order is explicit.

pub mod contract;
pub mod ev42;
pub mod f142;
pub mod registry;

pub use contract::{ModuleError, PayloadReader, WriteResult, WriterModule};
pub use ev42::EventWriter;
pub use f142::LogWriter;
pub use registry::ModuleRegistry;

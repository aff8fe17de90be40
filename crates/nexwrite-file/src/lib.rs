//! Hierarchical File Backend and Template Walker
//!
//! This crate implements the on-disk data model of the file writer:
//!
//! 1. **File backend** (`file`): a hierarchical file of groups, typed
//!    append-only datasets, attributes, and links. The tree lives in memory
//!    while a job runs; `flush` persists it atomically as a JSON snapshot
//!    (temp file + rename), and `open_rw` restores a snapshot for append.
//! 2. **Template walker** (`assembler`): expands a declared JSON template
//!    into groups, datasets, and attributes, collecting stream placeholders
//!    for writer modules to populate and link nodes for the finalization
//!    pass.
//!
//! The backend deliberately exposes only the operations the write path
//! needs: create/open, chunked 1-D and 2-D appends, fixed datasets,
//! attribute writes, and link creation. There is no random-access read API;
//! the inspection helpers exist for finalization and tests.

pub mod assembler;
pub mod dtype;
pub mod error;
pub mod file;

pub use assembler::{assemble, resolve_links, AssembledTemplate, PendingLink, StreamPlaceholder};
pub use dtype::{DType, DatasetValues, Element};
pub use error::{Error, Result};
pub use file::{Chunked1D, Chunked2D, Group, NexusFile};

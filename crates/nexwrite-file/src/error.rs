//! Error Types for the File Backend
//!
//! ## Error Categories
//!
//! ### File-level Errors
//! - `Io`: file creation, snapshot write, rename
//! - `FileExists`: exclusive creation refused because the path is taken
//! - `Corrupt`: a snapshot failed to parse on reopen
//!
//! ### Tree Errors
//! - `NodeExists`: a child with that name already exists
//! - `NodeNotFound`: path lookup failed
//! - `NotAGroup` / `NotADataset`: the node at the path has the wrong kind
//! - `DTypeMismatch`: an append or open used the wrong element type
//! - `ShapeMismatch`: a 2-D append row had the wrong width
//!
//! File-level errors abort a job; tree errors during template walking are
//! logged at the offending node and the walk continues.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File already exists: {0}")]
    FileExists(String),

    #[error("Corrupt file snapshot: {0}")]
    Corrupt(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Not a group: {0}")]
    NotAGroup(String),

    #[error("Not a dataset: {0}")]
    NotADataset(String),

    #[error("Dataset type mismatch at {path}: expected {expected}, found {found}")]
    DTypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Shape mismatch at {path}: expected row of {expected}, got {got}")]
    ShapeMismatch {
        path: String,
        expected: usize,
        got: usize,
    },

    #[error("File is closed")]
    Closed,
}

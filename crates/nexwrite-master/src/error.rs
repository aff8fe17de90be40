//! Error Types for the Control Plane
//!
//! `CommandRejected` carries the human-readable reason reported back to the
//! command sender through logs and the status topic. Job-level failures
//! during creation wrap the stream/file errors that caused them.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CommandError>;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command rejected: {0}")]
    Rejected(String),

    #[error("Malformed command: {0}")]
    Malformed(String),

    #[error("File error: {0}")]
    File(#[from] nexwrite_file::Error),

    #[error("Job error: {0}")]
    Job(#[from] nexwrite_stream::Error),
}

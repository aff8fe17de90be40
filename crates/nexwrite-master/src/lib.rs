//! Job Control Plane
//!
//! The master side of the file writer:
//!
//! - [`commands`]: the control-topic message formats and their validation
//! - [`handler`]: turns an accepted `FileWriter_new` into a running job
//!   (file creation, template walk, stream binding)
//! - [`master`]: the long-lived loop polling the control topic, publishing
//!   status, and reaping terminated jobs
//! - [`options`]: service configuration and identity
//!
//! The `nexwrite` binary wires these to a broker and the module registry.

pub mod commands;
pub mod error;
pub mod handler;
pub mod master;
pub mod options;

pub use commands::{parse_command, Command, NewCommand, StopCommand};
pub use error::{CommandError, Result};
pub use handler::CommandHandler;
pub use master::{Master, MasterOptions};
pub use options::{commands_from_file, default_service_id, ServiceConfig};

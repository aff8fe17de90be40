//! Service Configuration
//!
//! The service id identifies this process in status reports; the config
//! file (JSON) names the control and status topics, the job file directory,
//! and the timing defaults every job inherits.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{CommandError, Result};

/// `nexwrite--host:<hostname>--pid:<pid>`
pub fn default_service_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.to_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());
    format!("nexwrite--host:{host}--pid:{}", std::process::id())
}

fn default_command_topic() -> String {
    "filewriter-commands".to_string()
}

fn default_status_topic() -> String {
    "filewriter-status".to_string()
}

fn default_job_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_status_interval_ms() -> u64 {
    2_000
}

fn default_flush_interval_ms() -> u64 {
    5_000
}

fn default_before_start_leeway_ms() -> i64 {
    5_000
}

fn default_after_stop_leeway_ms() -> i64 {
    1_000
}

/// Service-level configuration, loaded from `--config-file`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_command_topic")]
    pub command_topic: String,

    #[serde(default = "default_status_topic")]
    pub status_topic: String,

    /// Directory job files are created in.
    #[serde(default = "default_job_directory")]
    pub job_directory: PathBuf,

    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    #[serde(default = "default_before_start_leeway_ms")]
    pub before_start_leeway_ms: i64,

    #[serde(default = "default_after_stop_leeway_ms")]
    pub after_stop_leeway_ms: i64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        serde_json::from_value(Value::Object(Default::default()))
            .expect("defaults deserialize from an empty object")
    }
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CommandError::Malformed(format!("cannot read config file: {e}")))?;
        serde_json::from_str(&text)
            .map_err(|e| CommandError::Malformed(format!("cannot parse config file: {e}")))
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Read `--commands-json`: a `{"commands": [...]}` document whose entries
/// are executed before the control-topic loop starts.
pub fn commands_from_file(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CommandError::Malformed(format!("cannot read commands file: {e}")))?;
    let document: Value = serde_json::from_str(&text)
        .map_err(|e| CommandError::Malformed(format!("cannot parse commands file: {e}")))?;
    let commands = document
        .get("commands")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            CommandError::Malformed("commands file needs a top-level commands array".to_string())
        })?;
    Ok(commands.iter().map(Value::to_string).collect())
}

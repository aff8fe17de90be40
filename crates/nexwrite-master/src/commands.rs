//! Control-Topic Commands
//!
//! Commands arrive as JSON on the control topic, dispatched by their `cmd`
//! field:
//!
//! | `cmd`                        | effect                                |
//! |------------------------------|---------------------------------------|
//! | `FileWriter_new`             | create a file-writing job             |
//! | `FileWriter_stop`            | stop one job (optionally rescheduled) |
//! | `FileWriter_exit`            | graceful service exit                 |
//! | `file_writer_tasks_clear_all`| stop every active job                 |
//!
//! Validation failures never panic and never touch running jobs; they
//! produce a `CommandRejected` with a reason.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{CommandError, Result};

/// A parsed control command.
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    #[serde(rename = "FileWriter_new")]
    New(NewCommand),
    #[serde(rename = "FileWriter_stop")]
    Stop(StopCommand),
    #[serde(rename = "FileWriter_exit")]
    Exit,
    #[serde(rename = "file_writer_tasks_clear_all")]
    ClearAll,
}

#[derive(Debug, Deserialize)]
pub struct FileAttributes {
    #[serde(default)]
    pub file_name: String,
}

/// `FileWriter_new`: everything needed to open a file and bind its streams.
#[derive(Debug, Deserialize)]
pub struct NewCommand {
    #[serde(default)]
    pub job_id: String,
    /// Broker override; informational with the in-process broker.
    pub broker: Option<String>,
    pub file_attributes: FileAttributes,
    /// Milliseconds since epoch; absent or 0 means "earliest available".
    pub start_time: Option<i64>,
    /// Milliseconds since epoch; absent or 0 means "run until stopped".
    pub stop_time: Option<i64>,
    pub nexus_structure: Value,
    /// Top-level stream list; binding is driven by the template's stream
    /// nodes, this list is validated for shape.
    #[serde(default)]
    pub streams: Vec<Value>,
}

/// `FileWriter_stop`: stop one job, either now or at `stop_time`.
#[derive(Debug, Deserialize)]
pub struct StopCommand {
    #[serde(default)]
    pub job_id: String,
    pub stop_time: Option<i64>,
}

/// Parse a control-topic payload.
pub fn parse_command(payload: &[u8]) -> Result<Command> {
    serde_json::from_slice(payload).map_err(|e| CommandError::Malformed(e.to_string()))
}

impl NewCommand {
    /// Structural validation, before any file is touched.
    pub fn validate(&self) -> Result<()> {
        if self.job_id.is_empty() {
            return Err(CommandError::Rejected("job_id must not be empty".to_string()));
        }
        if self.file_attributes.file_name.is_empty() {
            return Err(CommandError::Rejected(
                "file_attributes.file_name must not be empty".to_string(),
            ));
        }
        if !self.nexus_structure.is_object() {
            return Err(CommandError::Rejected(
                "nexus_structure must be an object".to_string(),
            ));
        }
        if let (Some(start), Some(stop)) = (self.start_time, self.stop_time) {
            if start > 0 && stop > 0 && start > stop {
                return Err(CommandError::Rejected(format!(
                    "start_time {start} is after stop_time {stop}"
                )));
            }
        }
        for (index, stream) in self.streams.iter().enumerate() {
            for key in ["topic", "source", "writer_module"] {
                let present = stream
                    .get(key)
                    .and_then(Value::as_str)
                    .map(|s| !s.is_empty())
                    .unwrap_or(false);
                if !present {
                    return Err(CommandError::Rejected(format!(
                        "streams[{index}] is missing {key}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn start_time_ms(&self) -> i64 {
        self.start_time.unwrap_or(0).max(0)
    }

    pub fn stop_time_ms(&self) -> i64 {
        self.stop_time.unwrap_or(0).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_command(extra: Value) -> Command {
        let mut base = json!({
            "cmd": "FileWriter_new",
            "job_id": "job-1",
            "file_attributes": {"file_name": "run1.nxs"},
            "nexus_structure": {"children": []}
        });
        if let (Some(base_map), Some(extra_map)) = (base.as_object_mut(), extra.as_object()) {
            for (k, v) in extra_map {
                base_map.insert(k.clone(), v.clone());
            }
        }
        parse_command(base.to_string().as_bytes()).unwrap()
    }

    // ---------------------------------------------------------------
    // Parsing
    // ---------------------------------------------------------------

    #[test]
    fn test_parse_new() {
        match new_command(json!({})) {
            Command::New(cmd) => {
                assert_eq!(cmd.job_id, "job-1");
                assert_eq!(cmd.file_attributes.file_name, "run1.nxs");
                assert_eq!(cmd.start_time_ms(), 0);
                assert_eq!(cmd.stop_time_ms(), 0);
            }
            other => panic!("expected New, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_stop_with_reschedule() {
        let cmd = parse_command(
            json!({"cmd": "FileWriter_stop", "job_id": "j", "stop_time": 123})
                .to_string()
                .as_bytes(),
        )
        .unwrap();
        match cmd {
            Command::Stop(stop) => {
                assert_eq!(stop.job_id, "j");
                assert_eq!(stop.stop_time, Some(123));
            }
            other => panic!("expected Stop, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_exit_and_clear() {
        assert!(matches!(
            parse_command(br#"{"cmd": "FileWriter_exit"}"#).unwrap(),
            Command::Exit
        ));
        assert!(matches!(
            parse_command(br#"{"cmd": "file_writer_tasks_clear_all"}"#).unwrap(),
            Command::ClearAll
        ));
    }

    #[test]
    fn test_parse_unknown_cmd_fails() {
        assert!(matches!(
            parse_command(br#"{"cmd": "FileWriter_dance"}"#).unwrap_err(),
            CommandError::Malformed(_)
        ));
    }

    #[test]
    fn test_parse_non_json_fails() {
        assert!(parse_command(b"not json").is_err());
    }

    // ---------------------------------------------------------------
    // Validation
    // ---------------------------------------------------------------

    #[test]
    fn test_validate_ok() {
        if let Command::New(cmd) = new_command(json!({})) {
            assert!(cmd.validate().is_ok());
        }
    }

    #[test]
    fn test_validate_empty_job_id() {
        if let Command::New(cmd) = new_command(json!({"job_id": ""})) {
            assert!(matches!(cmd.validate().unwrap_err(), CommandError::Rejected(_)));
        }
    }

    #[test]
    fn test_validate_empty_file_name() {
        if let Command::New(cmd) = new_command(json!({"file_attributes": {"file_name": ""}})) {
            assert!(cmd.validate().is_err());
        }
    }

    #[test]
    fn test_validate_start_after_stop() {
        if let Command::New(cmd) = new_command(json!({"start_time": 2000, "stop_time": 1000})) {
            assert!(matches!(cmd.validate().unwrap_err(), CommandError::Rejected(_)));
        }
    }

    #[test]
    fn test_validate_start_before_stop_ok() {
        if let Command::New(cmd) = new_command(json!({"start_time": 1000, "stop_time": 2000})) {
            assert!(cmd.validate().is_ok());
        }
    }

    #[test]
    fn test_validate_stream_entries() {
        if let Command::New(cmd) = new_command(json!({"streams": [
            {"topic": "T", "source": "S", "writer_module": "f142"}
        ]})) {
            assert!(cmd.validate().is_ok());
        }
        if let Command::New(cmd) = new_command(json!({"streams": [
            {"topic": "T", "source": "S"}
        ]})) {
            assert!(cmd.validate().is_err());
        }
    }

    #[test]
    fn test_validate_nexus_structure_must_be_object() {
        if let Command::New(cmd) = new_command(json!({"nexus_structure": [1, 2]})) {
            assert!(cmd.validate().is_err());
        }
    }
}

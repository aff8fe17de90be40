//! Command Handler
//!
//! Turns an accepted `FileWriter_new` into a running job:
//!
//! 1. validate the command
//! 2. create the file exclusively in the configured job directory
//! 3. walk the declared template (groups, datasets, placeholders, links)
//! 4. start the stream orchestrator, which binds every placeholder to a
//!    writer module and spawns the topic streams
//!
//! The handler never mutates a running job beyond what the master asks for
//! (stop flag, stop time); everything else is fixed at creation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nexwrite_file::{assemble, NexusFile};
use nexwrite_modules::ModuleRegistry;
use nexwrite_stream::{ConsumerFactory, JobOptions, StreamOrchestrator};
use tracing::info;

use crate::commands::NewCommand;
use crate::error::Result;
use crate::options::ServiceConfig;

/// Creates jobs on behalf of the master loop.
pub struct CommandHandler {
    registry: Arc<ModuleRegistry>,
    factory: Arc<dyn ConsumerFactory>,
    job_directory: PathBuf,
    flush_interval: Duration,
    before_start_leeway_ms: i64,
    after_stop_leeway_ms: i64,
}

impl CommandHandler {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        factory: Arc<dyn ConsumerFactory>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            registry,
            factory,
            job_directory: config.job_directory.clone(),
            flush_interval: config.flush_interval(),
            before_start_leeway_ms: config.before_start_leeway_ms,
            after_stop_leeway_ms: config.after_stop_leeway_ms,
        }
    }

    /// Validate and start a new job. The caller has already checked that the
    /// job id is unused.
    pub async fn create_job(&self, command: NewCommand) -> Result<StreamOrchestrator> {
        command.validate()?;
        let path = self.job_directory.join(&command.file_attributes.file_name);
        let file = NexusFile::create_exclusive(&path)?;
        let assembled = assemble(&file, &command.nexus_structure)?;
        let options = JobOptions {
            start_time_ms: command.start_time_ms(),
            stop_time_ms: command.stop_time_ms(),
            before_start_leeway_ms: self.before_start_leeway_ms,
            after_stop_leeway_ms: self.after_stop_leeway_ms,
            flush_interval: self.flush_interval,
            ..Default::default()
        };
        let job = StreamOrchestrator::start(
            command.job_id.clone(),
            file,
            assembled,
            &self.registry,
            &self.factory,
            options,
        )
        .await?;
        info!(
            job_id = %command.job_id,
            file = %path.display(),
            "job created"
        );
        Ok(job)
    }

    /// Registered writer-module ids (`--list-modules`).
    pub fn module_ids(&self) -> Vec<String> {
        self.registry.module_ids()
    }
}

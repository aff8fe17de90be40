//! Master Loop
//!
//! The single long-lived loop of the service. Each tick:
//!
//! 1. poll the control topic (bounded) and dispatch commands
//! 2. publish the status report when the cadence elapsed
//! 3. reap terminated jobs
//!
//! On shutdown every job is stopped and joined with a bounded timeout;
//! jobs that fail to join in time are logged and abandoned rather than
//! blocking the exit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use nexwrite_core::{BrokerConsumer, BrokerProducer, PollResult};
use nexwrite_stream::metrics::{register_metrics, COMMANDS_REJECTED};
use nexwrite_stream::StreamOrchestrator;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::commands::{parse_command, Command, NewCommand, StopCommand};
use crate::error::CommandError;
use crate::handler::CommandHandler;
use crate::options::default_service_id;

/// Bound on handling one command, job creation included.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Timing and identity of the master loop.
#[derive(Debug, Clone)]
pub struct MasterOptions {
    pub service_id: String,
    pub status_interval: Duration,
    pub poll_timeout: Duration,
    pub shutdown_join_timeout: Duration,
}

impl Default for MasterOptions {
    fn default() -> Self {
        Self {
            service_id: default_service_id(),
            status_interval: Duration::from_secs(2),
            poll_timeout: Duration::from_millis(500),
            shutdown_join_timeout: Duration::from_secs(30),
        }
    }
}

/// Owns the control-topic consumer, the active-jobs table, the status
/// publisher, and the exit flag.
pub struct Master {
    options: MasterOptions,
    handler: CommandHandler,
    command_consumer: Box<dyn BrokerConsumer>,
    status_producer: Option<Box<dyn BrokerProducer>>,
    jobs: HashMap<String, StreamOrchestrator>,
    exit: Arc<AtomicBool>,
}

impl Master {
    pub fn new(
        options: MasterOptions,
        handler: CommandHandler,
        command_consumer: Box<dyn BrokerConsumer>,
        status_producer: Option<Box<dyn BrokerProducer>>,
    ) -> Self {
        Self {
            options,
            handler,
            command_consumer,
            status_producer,
            jobs: HashMap::new(),
            exit: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared exit flag; external shutdown (signals) sets it.
    pub fn exit_flag(&self) -> Arc<AtomicBool> {
        self.exit.clone()
    }

    pub fn active_job_ids(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    pub fn job(&self, job_id: &str) -> Option<&StreamOrchestrator> {
        self.jobs.get(job_id)
    }

    /// Parse and dispatch one command payload.
    pub async fn handle_command_payload(&mut self, payload: &[u8]) {
        match parse_command(payload) {
            Ok(command) => self.dispatch(command).await,
            Err(e) => {
                COMMANDS_REJECTED.inc();
                warn!(error = %e, "ignoring malformed control message");
            }
        }
    }

    async fn dispatch(&mut self, command: Command) {
        match command {
            Command::New(cmd) => self.handle_new(cmd).await,
            Command::Stop(cmd) => self.handle_stop(cmd).await,
            Command::Exit => {
                info!("exit command received");
                self.exit.store(true, Ordering::Release);
            }
            Command::ClearAll => {
                info!(jobs = self.jobs.len(), "stopping all jobs");
                for job in self.jobs.values() {
                    job.stop();
                }
            }
        }
    }

    async fn handle_new(&mut self, command: NewCommand) {
        if self.jobs.contains_key(&command.job_id) {
            COMMANDS_REJECTED.inc();
            warn!(
                job_id = %command.job_id,
                "command rejected: job_id is already active"
            );
            return;
        }
        let job_id = command.job_id.clone();
        match tokio::time::timeout(COMMAND_TIMEOUT, self.handler.create_job(command)).await {
            Ok(Ok(job)) => {
                self.jobs.insert(job_id, job);
            }
            Ok(Err(e @ CommandError::Rejected(_))) | Ok(Err(e @ CommandError::Malformed(_))) => {
                COMMANDS_REJECTED.inc();
                warn!(job_id = %job_id, error = %e, "command rejected");
            }
            Ok(Err(e)) => {
                COMMANDS_REJECTED.inc();
                error!(job_id = %job_id, error = %e, "job creation failed");
            }
            Err(_) => {
                COMMANDS_REJECTED.inc();
                error!(job_id = %job_id, "job creation timed out");
            }
        }
    }

    async fn handle_stop(&mut self, command: StopCommand) {
        match self.jobs.get(&command.job_id) {
            Some(job) => match command.stop_time {
                Some(stop_time) => {
                    info!(job_id = %command.job_id, stop_time, "stop time rescheduled");
                    job.set_stop_time(stop_time).await;
                }
                None => {
                    info!(job_id = %command.job_id, "stop requested");
                    job.stop();
                }
            },
            None => {
                warn!(job_id = %command.job_id, "stop for unknown job ignored");
            }
        }
    }

    /// Publish `{"type": "filewriter_status_master", ...}` to the status
    /// topic.
    async fn publish_status(&self) {
        let producer = match &self.status_producer {
            Some(producer) => producer,
            None => return,
        };
        let mut files = serde_json::Map::new();
        for (job_id, job) in &self.jobs {
            match serde_json::to_value(job.status().await) {
                Ok(info) => {
                    files.insert(job_id.clone(), info);
                }
                Err(e) => warn!(job_id = %job_id, error = %e, "cannot serialize job status"),
            }
        }
        let report = json!({
            "type": "filewriter_status_master",
            "service_id": self.options.service_id,
            "files": files,
        });
        if let Err(e) = producer.produce(Bytes::from(report.to_string())).await {
            warn!(error = %e, "status publication failed");
        }
        producer.poll_delivery().await;
        debug!(outq = producer.outq_len(), "status published");
    }

    /// Join and drop every terminated job.
    async fn reap_terminated(&mut self) {
        let done: Vec<String> = self
            .jobs
            .iter()
            .filter(|(_, job)| job.is_terminated())
            .map(|(id, _)| id.clone())
            .collect();
        for job_id in done {
            if let Some(job) = self.jobs.remove(&job_id) {
                job.join(Duration::from_secs(1)).await;
                info!(job_id = %job_id, "job reaped");
            }
        }
    }

    /// Run until the exit flag is set, then shut down every job.
    pub async fn run(&mut self) {
        register_metrics();
        info!(service_id = %self.options.service_id, "master loop started");
        let mut last_status = Instant::now();
        while !self.exit.load(Ordering::Acquire) {
            match self.command_consumer.poll(self.options.poll_timeout).await {
                PollResult::Message(envelope) => {
                    self.handle_command_payload(&envelope.payload).await;
                }
                PollResult::Error(e) => {
                    warn!(error = %e, "control topic poll error");
                }
                PollResult::Empty | PollResult::EndOfPartition | PollResult::TimedOut => {}
            }
            if last_status.elapsed() >= self.options.status_interval {
                last_status = Instant::now();
                self.publish_status().await;
            }
            self.reap_terminated().await;
        }
        self.shutdown().await;
    }

    /// Stop every job and join each with the configured timeout.
    pub async fn shutdown(&mut self) {
        info!(jobs = self.jobs.len(), "master shutting down");
        for job in self.jobs.values() {
            job.stop();
        }
        for (job_id, job) in self.jobs.drain() {
            if !job.join(self.options.shutdown_join_timeout).await {
                error!(job_id = %job_id, "job did not stop in time, abandoning");
            }
        }
        self.publish_status().await;
        info!("master loop finished");
    }
}

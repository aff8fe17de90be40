//! Stream Orchestrator
//!
//! One orchestrator per active job. It owns the job's sink (file plus
//! demultiplexers), starts a topic stream per bound topic, drives the
//! periodic file flush, and finalizes exactly once when every topic stream
//! has finished:
//!
//! 1. flush writer modules and the file one last time
//! 2. resolve the template's link nodes
//! 3. close the file
//!
//! `stop()` only sets the shared stop flag; partition consumers observe it
//! within one poll period, so stopping twice is indistinguishable from
//! stopping once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nexwrite_file::{AssembledTemplate, NexusFile};
use nexwrite_modules::ModuleRegistry;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::demux::TopicStats;
use crate::error::{Error, Result};
use crate::metrics::ACTIVE_JOBS;
use crate::partition::{ConsumerFactory, PartitionOptions};
use crate::sink::{build_sink, JobSink};
use crate::topic::TopicStream;

/// Job-level configuration distilled from the `FileWriter_new` command and
/// service defaults.
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Start of the consumption window in ms; 0 = latest available.
    pub start_time_ms: i64,
    /// End of the consumption window in ms; 0 = run until stopped.
    pub stop_time_ms: i64,
    pub before_start_leeway_ms: i64,
    pub after_stop_leeway_ms: i64,
    /// Cadence of the periodic file flush.
    pub flush_interval: Duration,
    pub poll_timeout: Duration,
    pub latest_backoff: i64,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            start_time_ms: 0,
            stop_time_ms: 0,
            before_start_leeway_ms: 5_000,
            after_stop_leeway_ms: 1_000,
            flush_interval: Duration::from_secs(5),
            poll_timeout: Duration::from_millis(500),
            latest_backoff: 0,
        }
    }
}

fn ms_to_ns(ms: i64) -> u64 {
    if ms <= 0 {
        0
    } else {
        ms as u64 * 1_000_000
    }
}

/// Per-job status snapshot, serialized into the master's status report.
#[derive(Debug, Clone, Serialize)]
pub struct StreamMasterInfo {
    pub job_id: String,
    pub file_name: String,
    pub state: String,
    pub topics: HashMap<String, TopicStats>,
}

/// Owns one job from stream binding to file close.
pub struct StreamOrchestrator {
    job_id: String,
    file_name: String,
    sink: Arc<Mutex<JobSink>>,
    stop_flag: Arc<AtomicBool>,
    stop_time_ms: Arc<AtomicI64>,
    terminated: Arc<AtomicBool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl StreamOrchestrator {
    /// Bind the job's streams and start consuming.
    ///
    /// Topic streams that fail to start (topic missing from the broker) are
    /// logged and skipped; if every topic fails the job fails, with the file
    /// finalized so nothing holds it open.
    pub async fn start(
        job_id: impl Into<String>,
        file: NexusFile,
        assembled: AssembledTemplate,
        registry: &Arc<ModuleRegistry>,
        factory: &Arc<dyn ConsumerFactory>,
        options: JobOptions,
    ) -> Result<Self> {
        let job_id = job_id.into();
        let file_name = file.path().display().to_string();
        let sink = build_sink(
            file,
            assembled,
            registry,
            ms_to_ns(options.start_time_ms),
            ms_to_ns(options.stop_time_ms),
        )?;
        let topics = sink.topics();
        let sink = Arc::new(Mutex::new(sink));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_time_ms = Arc::new(AtomicI64::new(options.stop_time_ms));

        let partition_options = PartitionOptions {
            start_time_ms: options.start_time_ms,
            before_start_leeway_ms: options.before_start_leeway_ms,
            after_stop_leeway_ms: options.after_stop_leeway_ms,
            poll_timeout: options.poll_timeout,
            latest_backoff: options.latest_backoff,
        };

        let mut streams = Vec::new();
        for topic in topics {
            match TopicStream::start(
                factory,
                &topic,
                sink.clone(),
                stop_flag.clone(),
                stop_time_ms.clone(),
                partition_options.clone(),
            )
            .await
            {
                Ok(stream) => streams.push(stream),
                Err(e) => {
                    warn!(job_id = %job_id, topic = %topic, error = %e, "topic stream failed to start");
                }
            }
        }
        if streams.is_empty() {
            if let Err(e) = sink.lock().await.finalize() {
                error!(job_id = %job_id, error = %e, "finalizing failed job");
            }
            return Err(Error::AllTopicsFailed);
        }

        ACTIVE_JOBS.inc();
        info!(job_id = %job_id, file = %file_name, topics = streams.len(), "job started");

        let terminated = Arc::new(AtomicBool::new(false));
        let supervisor = tokio::spawn(Self::supervise(
            job_id.clone(),
            streams,
            sink.clone(),
            options.flush_interval,
            terminated.clone(),
        ));

        Ok(Self {
            job_id,
            file_name,
            sink,
            stop_flag,
            stop_time_ms,
            terminated,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    /// Waits for every topic stream, then finalizes the file exactly once.
    async fn supervise(
        job_id: String,
        streams: Vec<TopicStream>,
        sink: Arc<Mutex<JobSink>>,
        flush_interval: Duration,
        terminated: Arc<AtomicBool>,
    ) {
        let flush_sink = sink.clone();
        let flush_job = job_id.clone();
        let flusher = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                if let Err(e) = flush_sink.lock().await.flush() {
                    error!(job_id = %flush_job, error = %e, "periodic flush failed");
                }
            }
        });

        for stream in streams {
            let topic = stream.topic().to_string();
            let states = stream.join().await;
            info!(job_id = %job_id, topic = %topic, states = ?states, "topic stream finished");
        }
        flusher.abort();

        if let Err(e) = sink.lock().await.finalize() {
            error!(job_id = %job_id, error = %e, "file finalization failed");
        }
        ACTIVE_JOBS.dec();
        terminated.store(true, Ordering::Release);
        info!(job_id = %job_id, "job terminated");
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Request the job to stop. Idempotent; consumers exit within one poll
    /// period.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    /// Reschedule the absolute stop time (ms since epoch).
    pub async fn set_stop_time(&self, stop_time_ms: i64) {
        self.stop_time_ms.store(stop_time_ms, Ordering::Release);
        self.sink
            .lock()
            .await
            .set_stop_time(ms_to_ns(stop_time_ms));
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Current status snapshot for the status publisher.
    pub async fn status(&self) -> StreamMasterInfo {
        let topics = self.sink.lock().await.stats();
        StreamMasterInfo {
            job_id: self.job_id.clone(),
            file_name: self.file_name.clone(),
            state: if self.is_terminated() {
                "terminated".to_string()
            } else {
                "writing".to_string()
            },
            topics,
        }
    }

    /// Await the supervisor, bounded by `timeout`. Returns false when the
    /// join timed out (the job is logged and abandoned by the caller).
    pub async fn join(&self, timeout: Duration) -> bool {
        let handle = self.supervisor.lock().await.take();
        match handle {
            Some(handle) => match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    error!(job_id = %self.job_id, error = %e, "job supervisor panicked");
                    true
                }
                Err(_) => false,
            },
            None => true,
        }
    }
}

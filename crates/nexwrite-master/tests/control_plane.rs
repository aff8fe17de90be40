//! Control-plane tests: commands in over the broker, jobs out, status
//! reports back.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use nexwrite_core::wire::{self, LogData, LogValue};
use nexwrite_core::{BrokerConsumer, MemoryBroker};
use nexwrite_file::{DatasetValues, NexusFile};
use nexwrite_master::{CommandHandler, Master, MasterOptions, ServiceConfig};
use nexwrite_modules::ModuleRegistry;
use nexwrite_stream::ConsumerFactory;
use serde_json::{json, Value};

fn log_payload(source: &str, timestamp_ns: u64, value: f64) -> Bytes {
    wire::encode_log(&LogData {
        source_name: source.to_string(),
        timestamp_ns,
        value: LogValue::Double(value),
    })
}

fn new_job_command(job_id: &str, file_name: &str, topic: &str) -> String {
    json!({
        "cmd": "FileWriter_new",
        "job_id": job_id,
        "broker": "localhost:9092",
        "file_attributes": {"file_name": file_name},
        "nexus_structure": {"children": [
            {"type": "group", "name": "entry", "children": [
                {"type": "stream", "stream":
                    {"topic": topic, "source": "S", "writer_module": "f142", "type": "double"}}
            ]}
        ]},
        "streams": [
            {"topic": topic, "source": "S", "writer_module": "f142"}
        ]
    })
    .to_string()
}

async fn master_for(broker: &MemoryBroker, dir: &tempfile::TempDir) -> Master {
    let config = ServiceConfig {
        job_directory: dir.path().to_path_buf(),
        ..Default::default()
    };
    let registry = Arc::new(ModuleRegistry::with_default_modules());
    let factory: Arc<dyn ConsumerFactory> = Arc::new(broker.clone());
    let handler = CommandHandler::new(registry, factory, &config);

    broker.create_topic("filewriter-commands", 1).await;
    broker.create_topic("filewriter-status", 1).await;
    let mut consumer = broker.consumer();
    consumer
        .add_topic_at_timestamp("filewriter-commands", 0)
        .await
        .unwrap();
    let producer = broker.producer("filewriter-status", 0);

    let options = MasterOptions {
        service_id: "nexwrite--test".to_string(),
        status_interval: Duration::from_millis(100),
        poll_timeout: Duration::from_millis(20),
        shutdown_join_timeout: Duration::from_secs(10),
    };
    Master::new(options, handler, Box::new(consumer), Some(Box::new(producer)))
}

async fn wait_for<F: FnMut() -> bool>(mut condition: F, what: &str) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

// -------------------------------------------------------------------
// Direct dispatch
// -------------------------------------------------------------------

#[tokio::test]
async fn job_lifecycle_via_command_payloads() {
    let broker = MemoryBroker::new();
    broker.create_topic("T", 1).await;
    broker
        .publish_at("T", 0, log_payload("S", 1_000, 42.0), 10)
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut master = master_for(&broker, &dir).await;

    master
        .handle_command_payload(new_job_command("job-1", "run1.nxs", "T").as_bytes())
        .await;
    assert_eq!(master.active_job_ids(), vec!["job-1".to_string()]);
    assert!(dir.path().join("run1.nxs").exists());

    // Stop and wait for the job to terminate.
    master
        .handle_command_payload(br#"{"cmd": "FileWriter_stop", "job_id": "job-1"}"#)
        .await;
    let job_terminated = {
        let job = master.job("job-1").unwrap();
        job.join(Duration::from_secs(10)).await
    };
    assert!(job_terminated);

    let file = NexusFile::open_rw(dir.path().join("run1.nxs")).unwrap();
    assert!(file.node_exists("/entry"));
}

#[tokio::test]
async fn duplicate_job_id_rejected() {
    let broker = MemoryBroker::new();
    broker.create_topic("T", 1).await;
    let dir = tempfile::tempdir().unwrap();
    let mut master = master_for(&broker, &dir).await;

    master
        .handle_command_payload(new_job_command("job-1", "a.nxs", "T").as_bytes())
        .await;
    master
        .handle_command_payload(new_job_command("job-1", "b.nxs", "T").as_bytes())
        .await;
    assert_eq!(master.active_job_ids().len(), 1);
    assert!(!dir.path().join("b.nxs").exists());

    master.shutdown().await;
}

#[tokio::test]
async fn invalid_commands_create_no_jobs() {
    let broker = MemoryBroker::new();
    let dir = tempfile::tempdir().unwrap();
    let mut master = master_for(&broker, &dir).await;

    master.handle_command_payload(b"not json at all").await;
    master
        .handle_command_payload(br#"{"cmd": "FileWriter_new", "job_id": ""}"#)
        .await;
    master
        .handle_command_payload(
            json!({
                "cmd": "FileWriter_new",
                "job_id": "job-x",
                "file_attributes": {"file_name": "x.nxs"},
                "start_time": 2000,
                "stop_time": 1000,
                "nexus_structure": {"children": []}
            })
            .to_string()
            .as_bytes(),
        )
        .await;
    // Stop for a job that never existed is ignored.
    master
        .handle_command_payload(br#"{"cmd": "FileWriter_stop", "job_id": "ghost"}"#)
        .await;

    assert!(master.active_job_ids().is_empty());
    assert!(!dir.path().join("x.nxs").exists());
}

#[tokio::test]
async fn clear_all_stops_every_job() {
    let broker = MemoryBroker::new();
    broker.create_topic("TA", 1).await;
    broker.create_topic("TB", 1).await;
    let dir = tempfile::tempdir().unwrap();
    let mut master = master_for(&broker, &dir).await;

    master
        .handle_command_payload(new_job_command("job-a", "a.nxs", "TA").as_bytes())
        .await;
    master
        .handle_command_payload(new_job_command("job-b", "b.nxs", "TB").as_bytes())
        .await;
    assert_eq!(master.active_job_ids().len(), 2);

    master
        .handle_command_payload(br#"{"cmd": "file_writer_tasks_clear_all"}"#)
        .await;

    assert!(master.job("job-a").unwrap().join(Duration::from_secs(10)).await);
    assert!(master.job("job-b").unwrap().join(Duration::from_secs(10)).await);
}

// -------------------------------------------------------------------
// Full loop over the broker
// -------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_cycle_over_the_control_topic() {
    let broker = MemoryBroker::new();
    broker.create_topic("T", 1).await;
    broker
        .publish_at("T", 0, log_payload("S", 1_000, 1.5), 10)
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let master = master_for(&broker, &dir).await;
    let handle = tokio::spawn(async move {
        let mut master = master;
        master.run().await;
    });

    // Create the job over the control topic.
    broker
        .publish(
            "filewriter-commands",
            0,
            Bytes::from(new_job_command("job-live", "live.nxs", "T")),
        )
        .await
        .unwrap();

    let file_path = dir.path().join("live.nxs");
    wait_for(|| file_path.exists(), "job file created").await;

    // Status reports mention the job.
    let mut saw_job_in_status = false;
    for _ in 0..200 {
        let reports = broker.payloads("filewriter-status", 0).await.unwrap();
        saw_job_in_status = reports.iter().any(|payload| {
            serde_json::from_slice::<Value>(payload)
                .map(|status| {
                    status["type"] == "filewriter_status_master"
                        && status["service_id"] == "nexwrite--test"
                        && status["files"].get("job-live").is_some()
                })
                .unwrap_or(false)
        });
        if saw_job_in_status {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(saw_job_in_status, "no status report mentioned the job");

    // Stop the job, then exit the master.
    broker
        .publish(
            "filewriter-commands",
            0,
            Bytes::from_static(br#"{"cmd": "FileWriter_stop", "job_id": "job-live"}"#),
        )
        .await
        .unwrap();
    broker
        .publish(
            "filewriter-commands",
            0,
            Bytes::from_static(br#"{"cmd": "FileWriter_exit"}"#),
        )
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(30), handle)
        .await
        .expect("master loop should exit")
        .unwrap();

    // The job's file closed with its data flushed. The backlog message was
    // behind the latest offset, so the dataset may be empty or hold the
    // value, depending on assignment timing; the file itself must parse.
    let file = NexusFile::open_rw(&file_path).unwrap();
    assert!(file.node_exists("/entry"));
    if file.dataset_rows("/entry/value").unwrap() > 0 {
        assert_eq!(
            file.dataset_values("/entry/value").unwrap(),
            DatasetValues::Double(vec![1.5])
        );
    }
}

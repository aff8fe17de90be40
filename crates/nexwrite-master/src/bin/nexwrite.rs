//! nexwrite - streaming file-writing service
//!
//! Consumes instrument messages from the broker and writes one hierarchical
//! data file per job, driven by JSON commands on the control topic.
//!
//! ```bash
//! # List the writer modules this build ships
//! nexwrite --list-modules
//!
//! # Run with a config file and a set of startup commands
//! nexwrite --config-file config.json --commands-json commands.json
//! ```
//!
//! Exit codes: 0 clean, 1 configuration error, 2 fatal runtime error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use nexwrite_core::{BrokerConsumer, MemoryBroker};
use nexwrite_master::{commands_from_file, CommandHandler, Master, MasterOptions, ServiceConfig};
use nexwrite_modules::ModuleRegistry;
use nexwrite_stream::ConsumerFactory;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "nexwrite")]
#[command(about = "Streaming file-writing service for instrument data", long_about = None)]
struct Cli {
    /// JSON file with a "commands" array executed at startup
    #[arg(long)]
    commands_json: Option<PathBuf>,

    /// Service configuration file (JSON)
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Status topic override, e.g. "localhost:9092/filewriter-status"
    #[arg(long)]
    kafka_status_uri: Option<String>,

    /// Print the registered writer modules and exit
    #[arg(long)]
    list_modules: bool,

    /// Log file path (stderr when absent)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log level: 0 error, 1 warn, 2 info, 3 debug, 4 trace
    #[arg(long, default_value_t = 2)]
    log_level: u8,

    /// Service id used in status reports
    #[arg(long)]
    service_id: Option<String>,
}

fn log_level(n: u8) -> Level {
    match n {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = log_level(cli.log_level);
    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

/// Status topic from `--kafka-status-uri`: everything after the last slash,
/// or the whole value when no slash is present.
fn status_topic_from_uri(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

/// Everything that can fail with exit code 1 (configuration).
fn load_inputs(cli: &Cli) -> anyhow::Result<(ServiceConfig, Vec<String>)> {
    let mut config = match &cli.config_file {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("loading config file {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    if let Some(uri) = &cli.kafka_status_uri {
        config.status_topic = status_topic_from_uri(uri).to_string();
    }
    let startup_commands = match &cli.commands_json {
        Some(path) => commands_from_file(path)
            .with_context(|| format!("loading commands file {}", path.display()))?,
        None => Vec::new(),
    };
    Ok((config, startup_commands))
}

async fn run(
    cli: Cli,
    config: ServiceConfig,
    startup_commands: Vec<String>,
) -> anyhow::Result<()> {
    let registry = Arc::new(ModuleRegistry::with_default_modules());

    let broker = MemoryBroker::new();
    broker.create_topic(&config.command_topic, 1).await;
    broker.create_topic(&config.status_topic, 1).await;

    let mut command_consumer = broker.consumer();
    command_consumer
        .add_topic(&config.command_topic)
        .await
        .context("subscribing to the command topic")?;
    let status_producer = broker.producer(&config.status_topic, 0);

    let factory: Arc<dyn ConsumerFactory> = Arc::new(broker.clone());
    let handler = CommandHandler::new(registry, factory, &config);

    let options = MasterOptions {
        service_id: cli
            .service_id
            .unwrap_or_else(nexwrite_master::default_service_id),
        status_interval: config.status_interval(),
        ..Default::default()
    };
    info!(
        service_id = %options.service_id,
        command_topic = %config.command_topic,
        status_topic = %config.status_topic,
        "nexwrite starting"
    );

    let mut master = Master::new(
        options,
        handler,
        Box::new(command_consumer),
        Some(Box::new(status_producer)),
    );

    // Commands given directly in the startup file, useful for testing and
    // unattended deployments.
    for command in startup_commands {
        master.handle_command_payload(command.as_bytes()).await;
    }

    let exit_flag = master.exit_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            exit_flag.store(true, Ordering::Release);
        }
    });

    master.run().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.list_modules {
        for id in ModuleRegistry::with_default_modules().module_ids() {
            println!("{id}");
        }
        return ExitCode::SUCCESS;
    }

    if let Err(e) = init_logging(&cli) {
        eprintln!("configuration error: {e:#}");
        return ExitCode::from(1);
    }

    let (config, startup_commands) = match load_inputs(&cli) {
        Ok(inputs) => inputs,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::from(1);
        }
    };

    match run(cli, config, startup_commands).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fatal: {e:#}");
            ExitCode::from(2)
        }
    }
}

//! pushlink daemon: keeps the configured broker connection alive, logs
//! status changes and inbound messages as JSON, and publishes lines read
//! from stdin.

use clap::{Parser, Subcommand};
use pushlink::broker::rumqtt::RumqttClientFactory;
use pushlink::manager::reachability::StaticReachability;
use pushlink::observability::logging::init_default_logging;
use pushlink::{
    ConnectionManager, DisconnectReason, Dispatcher, LogNotifier, MessageEvent, Observer,
    PublishRequest, ServiceConfig, StatusEvent,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "pushlink", version, about = "Resilient broker-connection keeper")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "pushlink.toml", env = "PUSHLINK_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the connection keeper until interrupted
    Run,
    /// Validate the configuration
    Config {
        /// Print the validated configuration
        #[arg(long)]
        show: bool,
    },
}

/// Mirrors every status change and inbound message to the log as JSON.
struct JsonLogObserver;

#[async_trait::async_trait]
impl Observer for JsonLogObserver {
    async fn status_changed(&self, event: &StatusEvent) {
        match serde_json::to_string(event) {
            Ok(json) => info!(event = %json, "status"),
            Err(error) => warn!(%error, "failed to encode status event"),
        }
    }

    async fn message_received(&self, event: &MessageEvent) {
        info!(topic = %event.topic, bytes = event.payload.len(), "message");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run => run(&cli.config).await,
        Command::Config { show } => check_config(&cli.config, show),
    }
}

async fn run(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    init_default_logging();
    let config = ServiceConfig::load_from_file(config_path)?;
    info!(host = %config.broker.host, port = config.broker.port, "starting pushlink");

    let dispatcher = Arc::new(Dispatcher::new());
    let observer = Arc::new(JsonLogObserver);
    dispatcher.register(&observer);

    let manager = ConnectionManager::new(
        config,
        RumqttClientFactory,
        Arc::new(StaticReachability),
        Arc::new(LogNotifier),
        dispatcher,
    )?;

    let intake = manager.publish_intake();
    tokio::spawn(pump_stdin(intake));

    manager.start().await;
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    manager.disconnect(DisconnectReason::UserRequest).await;
    Ok(())
}

/// Read `topic payload...` lines from stdin into the publish intake.
async fn pump_stdin(intake: tokio::sync::mpsc::Sender<PublishRequest>) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                error!(%err, "stdin read failed");
                break;
            }
        };
        let Some((topic, payload)) = line.split_once(' ') else {
            warn!(%line, "expected 'topic payload', skipping");
            continue;
        };
        let request = PublishRequest {
            topic: topic.to_string(),
            payload: payload.to_string().into(),
        };
        if intake.send(request).await.is_err() {
            break;
        }
    }
}

fn check_config(config_path: &Path, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::load_from_file(config_path)?;
    println!("configuration ok: {}", config_path.display());
    if show {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}

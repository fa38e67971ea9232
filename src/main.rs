pub mod config;
pub mod controller;
pub mod drive;
pub mod mqtt;

use crate::config::Config;
use crate::controller::CollectorHandle;
use crate::drive::{CommandMode, DriveHandle, DriveSnapshot};
use crate::mqtt::mqtt_handler::{MQTTStatus, MqttHandler};
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Joystick teleoperation over MQTT
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Configuration file (default: ~/.teledrive/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker address, `host` or `host:port`
    #[arg(short, long)]
    broker: Option<String>,

    /// Payload format: analog or digital
    #[arg(short, long)]
    mode: Option<CommandMode>,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let (mqtt_handler, link) = MqttHandler::spawn(config.mqtt.clone());

    let (event_tx, event_rx) = mpsc::channel(config.controller.event_buffer);
    let drive = DriveHandle::spawn(config.drive.clone(), link, event_rx);
    let collector = CollectorHandle::spawn(config.controller.clone(), event_tx);

    let status_stop = CancellationToken::new();
    let status_task = tokio::spawn(report_status(
        mqtt_handler.subscribe(),
        drive.subscribe(),
        status_stop.clone(),
    ));

    info!("Ready, press Ctrl+C to quit");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    // Drive first so the final stop still finds the link up
    if let Err(e) = collector.shutdown().await {
        warn!("Collector shutdown: {}", e);
    }
    drive.shutdown().await?;
    mqtt_handler.shutdown().await;
    status_stop.cancel();
    if let Err(e) = status_task.await {
        error!("Status task terminated abnormally: {}", e);
    }

    info!("Bye");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&path)?;

    if let Some(broker) = &cli.broker {
        config
            .mqtt
            .apply_broker(broker)
            .map_err(|e| eyre!("Invalid --broker: {}", e))?;
    }
    if let Some(mode) = cli.mode {
        config.drive.mode = mode;
    }

    config.validate()?;
    info!(
        "Using broker {}:{}, topic {}, {:?} mode, {}ms tick",
        config.mqtt.host,
        config.mqtt.port,
        config.drive.topic,
        config.drive.mode,
        config.drive.tick_interval_ms
    );
    Ok(config)
}

/// Status display: logs link state changes and drive activity.
async fn report_status(
    mut mqtt_status: watch::Receiver<MQTTStatus>,
    mut drive_status: watch::Receiver<DriveSnapshot>,
    stop: CancellationToken,
) {
    let mut last_state = mqtt_status.borrow().connection_state;
    let mut last_dragging = false;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            changed = mqtt_status.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = mqtt_status.borrow_and_update().clone();
                if status.connection_state != last_state {
                    info!("Link: {:?}", status.connection_state);
                    if let Some(error) = status.error_messages.last() {
                        debug!("Last link error: {}", error);
                    }
                    last_state = status.connection_state;
                }
            }
            changed = drive_status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = drive_status.borrow_and_update().clone();
                if snapshot.dragging != last_dragging {
                    info!("Drive: {}", snapshot);
                    last_dragging = snapshot.dragging;
                } else {
                    debug!("Drive: {}", snapshot);
                }
            }
        }
    }
}

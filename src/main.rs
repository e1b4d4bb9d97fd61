use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use mqtt_adapter::bridge::{Bridge, BridgeHandle, BridgeSettings};
use mqtt_adapter::bus::websocket::WebSocketBus;
use mqtt_adapter::config::{BridgeConfig, ConfigFileStore};
use mqtt_adapter::identity::DeviceIdentity;
use mqtt_adapter::mqtt::transport::RumqttConnector;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Bridges the Mycroft message bus to an MQTT broker
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file, created with defaults when missing
    #[arg(short, long, env = "MQTT_ADAPTER_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup(cli.log_level)?;

    let path = cli.config.unwrap_or_else(BridgeConfig::default_path);
    BridgeConfig::ensure_default(&path).await?;
    let config = BridgeConfig::load(&path).await?;
    info!("Using configuration {}", path.display());

    let cancel = CancellationToken::new();
    let bus = WebSocketBus::connect(
        config.bus.url.clone(),
        Duration::from_secs(config.bus.reconnect_delay_secs),
        cancel.child_token(),
    );
    let identity = Arc::new(DeviceIdentity::new(Box::new(ConfigFileStore::new(
        path.clone(),
        config.discovery.uuid.clone(),
    ))));
    let device_id = identity
        .clone()
        .prefetch()
        .await
        .map_err(|e| eyre!("Failed to resolve device identity: {}", e))?;
    info!("Device identity {}", device_id);

    let bridge = Bridge::from_config(
        &config,
        identity,
        Arc::new(bus),
        Box::new(RumqttConnector::new()),
    )
    .map_err(|e| eyre!("Failed to set up bridge: {}", e))?;
    let (handle, task) = bridge.spawn();

    let mut hangup = hangup_signal()?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Interrupt received");
                break;
            }
            _ = wait_for_hangup(&mut hangup) => reload(&handle, &path, &config).await,
        }
    }

    if let Err(e) = handle.shutdown().await {
        error!("Bridge did not shut down cleanly: {}", e);
    }
    cancel.cancel();
    task.await?;
    Ok(())
}

fn setup(level: Level) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env(level);
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Applies broker settings from the file; topic and feature changes need a restart
async fn reload(handle: &BridgeHandle, path: &Path, running: &BridgeConfig) {
    info!("Reloading configuration from {}", path.display());
    let config = match BridgeConfig::load(path).await {
        Ok(config) => config,
        Err(e) => {
            error!("Keeping current configuration: {}", e);
            return;
        }
    };

    if config.namespace() != running.namespace()
        || config.features != running.features
        || config.bus != running.bus
        || config.device != running.device
    {
        warn!("Topic, feature, bus and device changes take effect after a restart");
    }

    if let Err(e) = handle.reconfigure(BridgeSettings::from(&config)).await {
        error!("Failed to reconfigure bridge: {}", e);
    }
}

#[cfg(unix)]
type Hangup = tokio::signal::unix::Signal;

#[cfg(not(unix))]
type Hangup = ();

#[cfg(unix)]
fn hangup_signal() -> Result<Hangup> {
    use tokio::signal::unix::{signal, SignalKind};
    Ok(signal(SignalKind::hangup())?)
}

#[cfg(not(unix))]
fn hangup_signal() -> Result<Hangup> {
    Ok(())
}

#[cfg(unix)]
async fn wait_for_hangup(hangup: &mut Hangup) {
    if hangup.recv().await.is_none() {
        std::future::pending::<()>().await
    }
}

#[cfg(not(unix))]
async fn wait_for_hangup(_hangup: &mut Hangup) {
    std::future::pending::<()>().await
}

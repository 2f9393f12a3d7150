//! deskbridge CLI entry point.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use deskbridge::config::BridgeConfig;
use deskbridge::crypto::KeyStore;
use deskbridge::pairing::{DeviceRegistry, DeviceStore, FileDeviceStore};
use deskbridge::server::{AppState, BridgeServer};

#[derive(Parser)]
#[command(name = "deskbridge", version, about = "Companion-device bridge daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bridge daemon (default).
    Serve,
    /// Inspect and revoke paired devices.
    Devices {
        #[command(subcommand)]
        command: DevicesCommand,
    },
    /// Delete the host identity, invalidating every pairing.
    ResetIdentity {
        /// Also remove all paired devices.
        #[arg(long)]
        wipe_devices: bool,
    },
}

#[derive(Subcommand)]
enum DevicesCommand {
    /// List paired devices.
    List,
    /// Revoke one device by id.
    Revoke { id: String },
    /// Revoke every paired device.
    RevokeAll,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = BridgeConfig::from_env().context("loading configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Devices { command } => devices(config, command).await,
        Command::ResetIdentity { wipe_devices } => reset_identity(config, wipe_devices).await,
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("deskbridge=info,tower_http=warn")
            }),
        )
        .init();
}

async fn serve(config: BridgeConfig) -> anyhow::Result<()> {
    let prune_interval = std::time::Duration::from_secs(3600);
    let state = AppState::from_config(config)
        .await
        .context("initializing bridge state")?;

    // Expired devices are cleared at startup, then hourly.
    let pruned = state.registry.prune_expired_devices().await?;
    if pruned > 0 {
        tracing::info!(pruned, "Removed expired devices at startup");
    }
    let prune_handle = state.registry.spawn_prune_task(prune_interval);
    state.sessions.spawn_poll_task().await;

    let mut server = BridgeServer::start(state.clone())
        .await
        .context("starting bridge server")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    prune_handle.abort();
    state.sessions.shutdown().await;
    server.shutdown().await;
    Ok(())
}

async fn devices(config: BridgeConfig, command: DevicesCommand) -> anyhow::Result<()> {
    let identity = KeyStore::new(config.identity_path()).get_or_create().await?;
    let store: Arc<dyn DeviceStore> = Arc::new(FileDeviceStore::new(config.devices_path()));
    let registry = DeviceRegistry::new(identity, store, config.device_expiry_days);

    match command {
        DevicesCommand::List => {
            let devices = registry.list_devices().await?;
            if devices.is_empty() {
                println!("No paired devices.");
                return Ok(());
            }
            for device in devices {
                let last_seen = device
                    .last_seen
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                let state = if registry.is_device_expired(&device) {
                    " (expired)"
                } else {
                    ""
                };
                println!(
                    "{}  {}  paired {}  last seen {}{}",
                    device.id,
                    device.name,
                    device.paired_at.to_rfc3339(),
                    last_seen,
                    state,
                );
            }
        }
        DevicesCommand::Revoke { id } => {
            if registry.remove_device(&id).await? {
                println!("Revoked {id}.");
            } else {
                println!("No paired device {id}.");
            }
        }
        DevicesCommand::RevokeAll => {
            let count = registry.revoke_all_devices().await?;
            println!("Revoked {count} device(s).");
        }
    }
    Ok(())
}

async fn reset_identity(config: BridgeConfig, wipe_devices: bool) -> anyhow::Result<()> {
    let deleted = KeyStore::new(config.identity_path())
        .delete_persisted()
        .await?;
    if deleted {
        println!("Host identity deleted. Devices must pair again.");
    } else {
        println!("No host identity on disk.");
    }

    if wipe_devices {
        match tokio::fs::remove_file(config.devices_path()).await {
            Ok(()) => println!("Paired devices wiped."),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("removing devices file"),
        }
    }
    Ok(())
}

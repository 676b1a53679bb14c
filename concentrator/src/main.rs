//! Edge concentrator entry point: parses CLI configuration, brings up
//! logging and the BLE adapter, then runs the fleet controller and
//! upstream link until interrupted.

mod batcher;
mod ble;
mod ble_btleplug;
mod config;
mod error;
mod fleet;
mod model;
mod radio;
mod session;
mod status;
mod upstream;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ble_btleplug::BtleplugCentral;
use config::FleetConfig;
use fleet::FleetController;

/// Edge concentrator for the Bluno wearable fleet: decodes BLE sensor
/// frames and forwards them upstream over local sockets.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to the fleet inventory JSON file (spec §2).
    #[arg(long, default_value = "fleet.json")]
    fleet_config: PathBuf,

    /// Unix socket path for inbound commands.
    #[arg(long, default_value = "/tmp/concentrator-notif.sock")]
    notif_socket: PathBuf,

    /// Unix socket path for outbound decoded data.
    #[arg(long, default_value = "/tmp/concentrator-data.sock")]
    data_socket: PathBuf,

    /// Log level filter, e.g. `info`, `concentrator=debug`.
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let fleet_config = FleetConfig::load(&cli.fleet_config)?;
    info!(peripherals = fleet_config.peripherals.len(), "fleet inventory loaded");

    let ble = Arc::new(BtleplugCentral::init().await?);
    let root_cancel = CancellationToken::new();

    let fleet = Arc::new(Mutex::new(FleetController::new(
        fleet_config.clone(),
        ble,
        root_cancel.clone(),
    )));

    let status_task = tokio::spawn(status::run(fleet.clone(), root_cancel.child_token()));

    let (batch_tx, batch_rx) = mpsc::unbounded_channel();
    let upstream_cancel = root_cancel.child_token();
    let mut upstream_task = tokio::spawn(async move {
        if let Err(e) = upstream::serve(
            &cli.notif_socket,
            &cli.data_socket,
            fleet.clone(),
            &fleet_config,
            batch_tx,
            batch_rx,
            upstream_cancel,
        )
        .await
        {
            error!(error = %e, "upstream link terminated with an error");
        }
    });

    let upstream_already_finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
            false
        }
        _ = &mut upstream_task => {
            info!("upstream link exited, shutting down");
            true
        }
    };

    root_cancel.cancel();
    let _ = status_task.await;
    if !upstream_already_finished {
        let _ = upstream_task.await;
    }

    Ok(())
}

//! Discovers the floors of a building through a resource directory,
//! observes them, and logs the cached layout at every change.

use std::net::SocketAddr;
use std::time::Duration;

use storey_directory::client::DirectoryClient;

use storey_controller::cache::Snapshot;
use storey_controller::discovery::DiscoveryClient;

use clap::Parser;

use tracing::info;

#[derive(Debug, thiserror::Error)]
enum MonitorError {
    #[error("discovery failure: {0}")]
    Discovery(#[from] storey_controller::error::Error),
    #[error("cannot listen for the shutdown signal: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Base URL of the resource directory.
    #[arg(long, default_value = "http://127.0.0.1:5683")]
    directory: String,

    /// Address receiving the notifications, reachable by the devices.
    #[arg(long, default_value = "127.0.0.1:0")]
    callback: SocketAddr,

    /// Period between two directory lookups, in seconds.
    #[arg(long, default_value_t = 30)]
    refresh: u64,
}

fn log_layout(snapshot: &Snapshot) {
    if !snapshot.is_ready() {
        info!("Waiting for the resource directory");
        return;
    }

    let mut floors = 0;
    for floor in snapshot.floors() {
        floors += 1;
        let areas = floor
            .areas
            .iter()
            .map(|area| area.name.as_str())
            .collect::<Vec<_>>();
        info!(
            "Floor `{}` (`/{}` at {}): [{}]",
            floor.name,
            floor.path,
            floor.base_url,
            areas.join(", ")
        );
    }
    info!("{floors} floors observed");
}

#[tokio::main]
async fn main() -> Result<(), MonitorError> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();

    let client = DiscoveryClient::new(DirectoryClient::new(cli.directory))
        .callback_address(cli.callback)
        .refresh_period(Duration::from_secs(cli.refresh.max(1)));
    client.start().await?;

    let mut changes = client.cache().changes();
    log_layout(&changes.borrow_and_update());

    let signal = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => break signal,
            changed = changes.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let snapshot = std::sync::Arc::clone(&changes.borrow_and_update());
                log_layout(&snapshot);
            }
        }
    };

    info!("Shutting down");
    client.shutdown().await;
    signal.map_err(Into::into)
}

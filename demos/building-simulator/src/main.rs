//! Simulates a building, serves its resources over `HTTP`, and keeps them
//! registered in a resource directory.

use std::net::SocketAddr;
use std::time::Duration;

use storey::device::ALL_DEVICE_KINDS;

use storey_directory::client::DirectoryClient;
use storey_directory::service::DirectoryService;

use storey_os::devices::DeviceSettings;
use storey_os::registrar::Registrar;
use storey_os::server::DeviceServer;
use storey_os::tree::{ResourceTree, TreeConfig};

use clap::Parser;

use tokio::net::TcpListener;

use tokio_util::sync::CancellationToken;

use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
enum SimulatorError {
    #[error("building failure: {0}")]
    Building(#[from] storey_os::error::Error),
    #[error("resource directory failure: {0}")]
    Directory(#[from] storey_directory::error::Error),
    #[error("input/output failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("registrar task failure: {0}")]
    Registrar(#[from] tokio::task::JoinError),
}

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Address serving the building resources.
    #[arg(long, default_value = "127.0.0.1:8080")]
    address: SocketAddr,

    /// Host announced to the resource directory.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Base URL of the resource directory.
    #[arg(long, default_value = "http://127.0.0.1:5683")]
    directory: String,

    /// Runs a resource directory on this address and registers there.
    #[arg(long)]
    serve_directory: Option<SocketAddr>,

    /// Endpoint name of the building in the directory.
    #[arg(long, default_value = "building")]
    endpoint: String,

    /// Registration lifetime, in seconds.
    #[arg(long, default_value_t = 60)]
    lifetime: u32,

    /// Number of floors.
    #[arg(long, default_value_t = 2)]
    floors: u32,

    /// Number of areas per floor.
    #[arg(long, default_value_t = 2)]
    areas: u32,

    /// Sensor update period, in seconds.
    #[arg(long)]
    period: Option<u64>,

    /// Seed of the simulated values.
    #[arg(long)]
    seed: Option<u64>,

    /// Keeps every sensor at its initial value.
    #[arg(long)]
    no_simulation: bool,
}

impl Cli {
    fn device_settings(&self) -> DeviceSettings {
        let mut settings = DeviceSettings::new();
        if self.no_simulation {
            settings = settings.without_simulation();
        }
        if let Some(seed) = self.seed {
            settings = settings.seed(seed);
        }
        if let Some(period) = self.period {
            settings = settings.period(Duration::from_secs(period.max(1)));
        }
        settings
    }
}

// Every area holds one device of each kind, named after the kind.
fn provision(tree: &ResourceTree, floors: u32, areas: u32) -> Result<(), SimulatorError> {
    for floor in 1..=floors {
        let floor_id = floor.to_string();
        let _ = tree.provision_floor(&floor_id)?;
        for area in 1..=areas {
            let area_id = area.to_string();
            let _ = tree.provision_area(&floor_id, &area_id)?;
            for kind in ALL_DEVICE_KINDS {
                let _ = tree.provision_device(&floor_id, &area_id, kind.as_str(), *kind)?;
            }
        }
    }
    info!("Provisioned {floors} floors with {areas} areas each");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), SimulatorError> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();
    let shutdown = CancellationToken::new();

    let directory = match cli.serve_directory {
        Some(address) => {
            let address = DirectoryService::new()
                .spawn(address, shutdown.clone())
                .await?;
            format!("http://{address}")
        }
        None => cli.directory.clone(),
    };

    let tree = ResourceTree::with_config(TreeConfig::new().devices(cli.device_settings()));
    provision(&tree, cli.floors, cli.areas)?;

    let listener = TcpListener::bind(cli.address).await?;
    let port = listener.local_addr()?.port();

    let registrar = Registrar::new(
        DirectoryClient::new(directory),
        cli.endpoint.as_str(),
        cli.host.as_str(),
        port,
    )
    .lifetime(cli.lifetime)
    .spawn(tree.clone(), shutdown.clone());

    let signal = shutdown.clone();
    let _signal = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for the shutdown signal: {e}");
        }
        info!("Shutting down");
        signal.cancel();
    });

    DeviceServer::new(tree).run(listener, shutdown.clone()).await?;
    shutdown.cancel();
    registrar.await?;

    Ok(())
}

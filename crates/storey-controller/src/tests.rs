use std::net::SocketAddr;
use std::time::Duration;

use storey::device::DeviceKind;
use storey::directory::LookupQuery;

use storey_directory::client::DirectoryClient;
use storey_directory::service::DirectoryService;

use storey_os::devices::DeviceSettings;
use storey_os::registrar::Registrar;
use storey_os::server::DeviceServer;
use storey_os::tree::{ResourceTree, TreeConfig};

use tokio_util::sync::CancellationToken;

// A building served on a local port and registered in a local directory.
pub(crate) struct Building {
    pub(crate) directory: DirectoryClient,
    pub(crate) tree: ResourceTree,
}

impl Building {
    // Floor `1` with area `1`, holding the `cam` camera and the `lamp` and
    // `siren` switches.
    pub(crate) async fn start(shutdown: &CancellationToken) -> Self {
        let address = DirectoryService::new()
            .spawn(SocketAddr::from(([127, 0, 0, 1], 0)), shutdown.clone())
            .await
            .unwrap();
        let directory = DirectoryClient::new(format!("http://{address}"));

        let tree = ResourceTree::with_config(
            TreeConfig::new().devices(DeviceSettings::new().without_simulation()),
        );
        let _ = tree.provision_floor("1").unwrap();
        let _ = tree.provision_area("1", "1").unwrap();
        for (device_id, kind) in [
            ("cam", DeviceKind::Camera),
            ("lamp", DeviceKind::Light),
            ("siren", DeviceKind::Alarm),
        ] {
            let _ = tree.provision_device("1", "1", device_id, kind).unwrap();
        }

        let device = DeviceServer::new(tree.clone())
            .spawn(SocketAddr::from(([127, 0, 0, 1], 0)), shutdown.clone())
            .await
            .unwrap();

        let _registrar = Registrar::new(directory.clone(), "building", "127.0.0.1", device.port())
            .retry(Duration::from_millis(50), Duration::from_millis(200))
            .spawn(tree.clone(), shutdown.clone());

        let query = LookupQuery::resource_type("iot.floor");
        for _ in 0..100 {
            if directory
                .lookup(&query)
                .await
                .is_ok_and(|entries| !entries.is_empty())
            {
                return Self { directory, tree };
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("Building never registered");
    }
}

pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("Condition never met");
}

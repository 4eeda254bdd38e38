use storey::device::DeviceKind;

use futures_util::future::join_all;

use tracing::{info, warn};

use uuid::Uuid;

use crate::discovery::DiscoveryClient;
use crate::error::Result;
use crate::inventory::{DeviceDescriptor, Inventory, Policy};

// Value written to the switches of a disabled policy.
const SWITCH_OFF: &str = "false";

/// Returns the devices switched off when a [`Policy`] is disabled.
///
/// These are the lights and the alarms of the policy area.
#[must_use]
pub fn deactivation_targets<I>(inventory: &I, policy: &Policy) -> Vec<DeviceDescriptor>
where
    I: Inventory + ?Sized,
{
    inventory
        .devices(&policy.floor_id, &policy.area_id)
        .into_iter()
        .filter(|device| matches!(device.kind, DeviceKind::Light | DeviceKind::Alarm))
        .collect()
}

/// Disables a policy and switches off the lights and the alarms of its area.
///
/// Switches are written concurrently. A switch which cannot be written is
/// logged and skipped, so the returned paths are the switched ones only.
///
/// # Errors
///
/// An error is returned when the policy is not in the inventory.
pub async fn disable_policy<I>(
    inventory: &I,
    client: &DiscoveryClient,
    policy_id: Uuid,
) -> Result<Vec<String>>
where
    I: Inventory + ?Sized,
{
    let mut policy = inventory.policy(policy_id)?;
    policy.enabled = false;
    let policy = inventory.update_policy(policy)?;

    let paths = deactivation_targets(inventory, &policy)
        .iter()
        .map(DeviceDescriptor::resource_path)
        .collect::<Vec<_>>();

    let results = join_all(paths.iter().map(|path| client.write(path, SWITCH_OFF))).await;

    let switched = paths
        .into_iter()
        .zip(results)
        .filter_map(|(path, result)| match result {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("Cannot switch off `/{path}`: {e}");
                None
            }
        })
        .collect::<Vec<_>>();

    info!(
        "Policy `{}` disabled, {} switches off",
        policy.name,
        switched.len()
    );
    Ok(switched)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use storey::content::{Accept, ContentFormat};
    use storey::device::DeviceKind;

    use serial_test::serial;

    use tokio_util::sync::CancellationToken;

    use uuid::Uuid;

    use crate::discovery::DiscoveryClient;
    use crate::error::ErrorKind;
    use crate::inventory::tests::building_inventory;
    use crate::inventory::{DeviceDescriptor, Inventory, Policy};
    use crate::tests::Building;

    use super::{deactivation_targets, disable_policy};

    #[test]
    fn test_targets_are_keyed_on_kind() {
        let inventory = building_inventory();
        // Identifiers do not matter, only kinds do.
        let _ = inventory
            .create_device(DeviceDescriptor::new("1", "1", "light-meter", DeviceKind::Temperature))
            .unwrap();
        let _ = inventory
            .create_device(DeviceDescriptor::new("1", "1", "beacon", DeviceKind::Alarm))
            .unwrap();

        let policy = inventory
            .create_policy(Policy::new("1", "1", "night"))
            .unwrap();
        let targets = deactivation_targets(&inventory, &policy)
            .into_iter()
            .map(|device| device.id)
            .collect::<Vec<_>>();
        assert_eq!(targets, ["lamp", "siren", "beacon"]);
    }

    #[tokio::test]
    #[serial]
    async fn test_disable_policy() {
        let shutdown = CancellationToken::new();
        let building = Building::start(&shutdown).await;

        let client = DiscoveryClient::new(building.directory.clone())
            .refresh_period(Duration::from_secs(10));
        client.start().await.unwrap();

        let inventory = building_inventory();
        // Known to the inventory, missing from the building.
        let _ = inventory
            .create_device(DeviceDescriptor::new("1", "1", "ghost", DeviceKind::Light))
            .unwrap();
        let policy = inventory
            .create_policy(Policy::new("1", "1", "night"))
            .unwrap();

        let lamp = "floor/1/area/1/device/lamp/switch";
        let siren = "floor/1/area/1/device/siren/switch";
        for path in [lamp, siren] {
            client.write(path, "true").await.unwrap();
        }

        let switched = disable_policy(&inventory, &client, policy.id)
            .await
            .unwrap();
        assert_eq!(switched, [lamp, siren]);
        assert!(!inventory.policy(policy.id).unwrap().enabled);

        for path in [lamp, siren] {
            let representation = client
                .read(path, &Accept::only(ContentFormat::TextPlain))
                .await
                .unwrap();
            assert_eq!(representation.body, "false");
        }

        assert_eq!(
            disable_policy(&inventory, &client, Uuid::new_v4())
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );

        client.shutdown().await;
        shutdown.cancel();
    }
}

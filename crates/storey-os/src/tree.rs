use std::sync::Arc;

use storey::attributes::Link;
use storey::device::{ContainerKind, DeviceKind};

use tokio::sync::watch;

use tracing::info;

use crate::devices::DeviceSettings;
use crate::error::{Error, Result};
use crate::observe::DeliveryPolicy;
use crate::resource::{NodeContext, NodeKind, ResourceNode};

// Name of the tree root.
const BUILDING_NAME: &str = "building";

/// Configuration of a [`ResourceTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeConfig {
    policy: DeliveryPolicy,
    devices: DeviceSettings,
}

impl TreeConfig {
    /// Creates a [`TreeConfig`] with the default delivery policy and
    /// simulated devices.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            policy: DeliveryPolicy::new(),
            devices: DeviceSettings::new(),
        }
    }

    /// Sets the [`DeliveryPolicy`] of every observe relation.
    #[must_use]
    #[inline]
    pub const fn policy(mut self, policy: DeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the [`DeviceSettings`] of provisioned devices.
    #[must_use]
    #[inline]
    pub const fn devices(mut self, devices: DeviceSettings) -> Self {
        self.devices = devices;
        self
    }
}

/// A building, its floors, areas, devices, and device resources.
///
/// Paths follow the `floor/{floor}/area/{area}/device/{device}/{resource}`
/// layout, where the building is the empty path.
#[derive(Debug, Clone)]
pub struct ResourceTree {
    root: ResourceNode,
    context: Arc<NodeContext>,
}

impl Default for ResourceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceTree {
    /// Creates an empty [`ResourceTree`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(TreeConfig::new())
    }

    /// Creates an empty [`ResourceTree`] with a [`TreeConfig`].
    #[must_use]
    pub fn with_config(config: TreeConfig) -> Self {
        let context = Arc::new(NodeContext::new(config.policy, config.devices));
        let root = ResourceNode::composite(
            &context,
            None,
            ContainerKind::Building,
            "",
            BUILDING_NAME.into(),
        );
        Self { root, context }
    }

    /// Returns the building.
    #[must_use]
    pub const fn root(&self) -> &ResourceNode {
        &self.root
    }

    /// Finds the node at a path.
    ///
    /// Leading and trailing slashes are ignored.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<ResourceNode> {
        let mut segments = path.trim_matches('/').split('/').filter(|s| !s.is_empty());
        let mut node = self.root.clone();

        while let Some(segment) = segments.next() {
            let id = match node.kind() {
                NodeKind::Composite(kind) => match kind.child_segment() {
                    Some(expected) if expected == segment => segments.next()?,
                    Some(_) => return None,
                    None => segment,
                },
                NodeKind::Sensor | NodeKind::Actuator => return None,
            };
            node = node.child(id)?;
        }

        Some(node)
    }

    /// Adds a floor to the building.
    ///
    /// # Errors
    ///
    /// An error is returned when the floor already exists or its identifier
    /// is invalid.
    pub fn provision_floor(&self, floor_id: &str) -> Result<ResourceNode> {
        self.root.create_child(floor_id)
    }

    /// Adds an area to an existing floor.
    ///
    /// # Errors
    ///
    /// An error is returned when the floor is missing, the area already
    /// exists, or its identifier is invalid.
    pub fn provision_area(&self, floor_id: &str, area_id: &str) -> Result<ResourceNode> {
        self.lookup(&format!("floor/{floor_id}"))?
            .create_child(area_id)
    }

    /// Adds a device to an existing area.
    ///
    /// # Errors
    ///
    /// An error is returned when the area is missing, the device already
    /// exists, or its identifier is invalid.
    pub fn provision_device(
        &self,
        floor_id: &str,
        area_id: &str,
        device_id: &str,
        kind: DeviceKind,
    ) -> Result<ResourceNode> {
        self.lookup(&format!("floor/{floor_id}/area/{area_id}"))?
            .create_child(&format!("{device_id}:{kind}"))
    }

    /// Deletes the node at a path, together with its descendants.
    ///
    /// # Errors
    ///
    /// An error is returned when the path is missing or names the building.
    pub async fn deprovision(&self, path: &str) -> Result<()> {
        let _ = self.lookup(path)?.handle_delete("").await?;
        Ok(())
    }

    /// Returns the links of every node, depth first.
    #[must_use]
    pub fn links(&self) -> Vec<Link> {
        self.root.links()
    }

    /// Returns a receiver changing value at every structural change that
    /// requires a new directory registration.
    #[must_use]
    pub fn registration_requests(&self) -> watch::Receiver<u64> {
        self.context.registration_requests()
    }

    /// Stops every simulation and waits for the in-flight notifications.
    ///
    /// Observers receive no terminal notification.
    pub async fn shutdown(&self) {
        info!("Stopping the resource tree");
        self.root.clone().stop().await;
    }

    fn lookup(&self, path: &str) -> Result<ResourceNode> {
        self.find(path).ok_or_else(|| Error::not_found(path.trim_matches('/')))
    }
}

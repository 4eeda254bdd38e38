use storey::device::DeviceKind;

use indexmap::IndexMap;

use parking_lot::RwLock;

use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result};

/// A floor record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Floor {
    /// Floor identifier.
    pub id: String,
    /// Display name.
    pub name: String,
}

impl Floor {
    /// Creates a [`Floor`].
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// An area record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Area {
    /// Identifier of the floor containing the area.
    pub floor_id: String,
    /// Area identifier, unique within its floor.
    pub id: String,
    /// Display name.
    pub name: String,
}

impl Area {
    /// Creates an [`Area`].
    #[must_use]
    pub fn new(
        floor_id: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            floor_id: floor_id.into(),
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A device record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Identifier of the floor containing the device.
    pub floor_id: String,
    /// Identifier of the area containing the device.
    pub area_id: String,
    /// Device identifier, unique within its area.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Device kind.
    pub kind: DeviceKind,
}

impl DeviceDescriptor {
    /// Creates a [`DeviceDescriptor`] named after its identifier.
    #[must_use]
    pub fn new(
        floor_id: impl Into<String>,
        area_id: impl Into<String>,
        id: impl Into<String>,
        kind: DeviceKind,
    ) -> Self {
        let id = id.into();
        Self {
            floor_id: floor_id.into(),
            area_id: area_id.into(),
            name: id.clone(),
            id,
            kind,
        }
    }

    /// Returns the path of the device resource.
    #[must_use]
    pub fn path(&self) -> String {
        format!(
            "floor/{}/area/{}/device/{}",
            self.floor_id, self.area_id, self.id
        )
    }

    /// Returns the path of the device leaf resource.
    #[must_use]
    pub fn resource_path(&self) -> String {
        format!("{}/{}", self.path(), self.kind.resource_name())
    }
}

/// A security policy of an area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Policy identifier.
    ///
    /// The nil identifier asks the inventory to assign one on creation.
    pub id: Uuid,
    /// Identifier of the floor containing the area.
    pub floor_id: String,
    /// Identifier of the area.
    pub area_id: String,
    /// Display name.
    pub name: String,
    /// Whether the policy is enforced.
    pub enabled: bool,
}

impl Policy {
    /// Creates an enabled [`Policy`] without identifier.
    #[must_use]
    pub fn new(
        floor_id: impl Into<String>,
        area_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::nil(),
            floor_id: floor_id.into(),
            area_id: area_id.into(),
            name: name.into(),
            enabled: true,
        }
    }
}

/// User roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Manages the building layout, the policies, and the users.
    Admin,
    /// Enables and disables policies.
    Operator,
}

/// A user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Unique user name.
    pub username: String,
    /// User role.
    pub role: Role,
}

impl User {
    /// Creates a [`User`].
    #[must_use]
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            role,
        }
    }
}

/// Access to the building records.
///
/// Creations fail with [`ErrorKind::Conflict`] on an existing record, while
/// reads, updates, and deletions fail with [`ErrorKind::NotFound`] on a
/// missing one. Deleting a floor or an area also deletes its contents.
pub trait Inventory: Send + Sync {
    /// Returns all floors.
    fn floors(&self) -> Vec<Floor>;
    /// Returns a floor.
    fn floor(&self, id: &str) -> Result<Floor>;
    /// Creates a floor.
    fn create_floor(&self, floor: Floor) -> Result<Floor>;
    /// Replaces a floor.
    fn update_floor(&self, floor: Floor) -> Result<Floor>;
    /// Deletes a floor, its areas, devices, and policies.
    fn delete_floor(&self, id: &str) -> Result<Floor>;

    /// Returns the areas of a floor.
    fn areas(&self, floor_id: &str) -> Vec<Area>;
    /// Returns an area.
    fn area(&self, floor_id: &str, id: &str) -> Result<Area>;
    /// Creates an area in an existing floor.
    fn create_area(&self, area: Area) -> Result<Area>;
    /// Replaces an area.
    fn update_area(&self, area: Area) -> Result<Area>;
    /// Deletes an area, its devices, and policies.
    fn delete_area(&self, floor_id: &str, id: &str) -> Result<Area>;

    /// Returns the devices of an area.
    fn devices(&self, floor_id: &str, area_id: &str) -> Vec<DeviceDescriptor>;
    /// Returns a device.
    fn device(&self, floor_id: &str, area_id: &str, id: &str) -> Result<DeviceDescriptor>;
    /// Creates a device in an existing area.
    fn create_device(&self, device: DeviceDescriptor) -> Result<DeviceDescriptor>;
    /// Replaces a device.
    fn update_device(&self, device: DeviceDescriptor) -> Result<DeviceDescriptor>;
    /// Deletes a device.
    fn delete_device(&self, floor_id: &str, area_id: &str, id: &str) -> Result<DeviceDescriptor>;

    /// Returns all policies.
    fn policies(&self) -> Vec<Policy>;
    /// Returns the policies of an area.
    fn area_policies(&self, floor_id: &str, area_id: &str) -> Vec<Policy>;
    /// Returns a policy.
    fn policy(&self, id: Uuid) -> Result<Policy>;
    /// Creates a policy for an existing area, assigning its identifier when
    /// nil.
    fn create_policy(&self, policy: Policy) -> Result<Policy>;
    /// Replaces a policy.
    fn update_policy(&self, policy: Policy) -> Result<Policy>;
    /// Deletes a policy.
    fn delete_policy(&self, id: Uuid) -> Result<Policy>;

    /// Returns all users.
    fn users(&self) -> Vec<User>;
    /// Returns a user.
    fn user(&self, username: &str) -> Result<User>;
    /// Creates a user.
    fn create_user(&self, user: User) -> Result<User>;
    /// Replaces a user.
    fn update_user(&self, user: User) -> Result<User>;
    /// Deletes a user.
    fn delete_user(&self, username: &str) -> Result<User>;
}

type AreaKey = (String, String);
type DeviceKey = (String, String, String);

#[derive(Debug, Default)]
struct Tables {
    floors: IndexMap<String, Floor>,
    areas: IndexMap<AreaKey, Area>,
    devices: IndexMap<DeviceKey, DeviceDescriptor>,
    policies: IndexMap<Uuid, Policy>,
    users: IndexMap<String, User>,
}

fn not_found(what: &str, key: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::NotFound, format!("{what} `{key}` not found"))
}

fn conflict(what: &str, key: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::Conflict, format!("{what} `{key}` already exists"))
}

fn area_key(floor_id: &str, id: &str) -> AreaKey {
    (floor_id.to_owned(), id.to_owned())
}

fn device_key(floor_id: &str, area_id: &str, id: &str) -> DeviceKey {
    (floor_id.to_owned(), area_id.to_owned(), id.to_owned())
}

/// An [`Inventory`] kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    tables: RwLock<Tables>,
}

impl InMemoryInventory {
    /// Creates an empty [`InMemoryInventory`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inventory for InMemoryInventory {
    fn floors(&self) -> Vec<Floor> {
        self.tables.read().floors.values().cloned().collect()
    }

    fn floor(&self, id: &str) -> Result<Floor> {
        self.tables
            .read()
            .floors
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("Floor", id))
    }

    fn create_floor(&self, floor: Floor) -> Result<Floor> {
        let mut tables = self.tables.write();
        if tables.floors.contains_key(&floor.id) {
            return Err(conflict("Floor", &floor.id));
        }
        let _ = tables.floors.insert(floor.id.clone(), floor.clone());
        Ok(floor)
    }

    fn update_floor(&self, floor: Floor) -> Result<Floor> {
        let mut tables = self.tables.write();
        let stored = tables
            .floors
            .get_mut(&floor.id)
            .ok_or_else(|| not_found("Floor", &floor.id))?;
        stored.clone_from(&floor);
        Ok(floor)
    }

    fn delete_floor(&self, id: &str) -> Result<Floor> {
        let mut tables = self.tables.write();
        let floor = tables
            .floors
            .shift_remove(id)
            .ok_or_else(|| not_found("Floor", id))?;
        tables.areas.retain(|(floor_id, _), _| floor_id != id);
        tables.devices.retain(|(floor_id, _, _), _| floor_id != id);
        tables.policies.retain(|_, policy| policy.floor_id != id);
        Ok(floor)
    }

    fn areas(&self, floor_id: &str) -> Vec<Area> {
        self.tables
            .read()
            .areas
            .values()
            .filter(|area| area.floor_id == floor_id)
            .cloned()
            .collect()
    }

    fn area(&self, floor_id: &str, id: &str) -> Result<Area> {
        self.tables
            .read()
            .areas
            .get(&area_key(floor_id, id))
            .cloned()
            .ok_or_else(|| not_found("Area", format_args!("{floor_id}/{id}")))
    }

    fn create_area(&self, area: Area) -> Result<Area> {
        let mut tables = self.tables.write();
        if !tables.floors.contains_key(&area.floor_id) {
            return Err(not_found("Floor", &area.floor_id));
        }
        let key = area_key(&area.floor_id, &area.id);
        if tables.areas.contains_key(&key) {
            return Err(conflict("Area", format_args!("{}/{}", key.0, key.1)));
        }
        let _ = tables.areas.insert(key, area.clone());
        Ok(area)
    }

    fn update_area(&self, area: Area) -> Result<Area> {
        let mut tables = self.tables.write();
        let stored = tables
            .areas
            .get_mut(&area_key(&area.floor_id, &area.id))
            .ok_or_else(|| not_found("Area", format_args!("{}/{}", area.floor_id, area.id)))?;
        stored.clone_from(&area);
        Ok(area)
    }

    fn delete_area(&self, floor_id: &str, id: &str) -> Result<Area> {
        let mut tables = self.tables.write();
        let area = tables
            .areas
            .shift_remove(&area_key(floor_id, id))
            .ok_or_else(|| not_found("Area", format_args!("{floor_id}/{id}")))?;
        tables
            .devices
            .retain(|(device_floor, device_area, _), _| device_floor != floor_id || device_area != id);
        tables
            .policies
            .retain(|_, policy| policy.floor_id != floor_id || policy.area_id != id);
        Ok(area)
    }

    fn devices(&self, floor_id: &str, area_id: &str) -> Vec<DeviceDescriptor> {
        self.tables
            .read()
            .devices
            .values()
            .filter(|device| device.floor_id == floor_id && device.area_id == area_id)
            .cloned()
            .collect()
    }

    fn device(&self, floor_id: &str, area_id: &str, id: &str) -> Result<DeviceDescriptor> {
        self.tables
            .read()
            .devices
            .get(&device_key(floor_id, area_id, id))
            .cloned()
            .ok_or_else(|| not_found("Device", format_args!("{floor_id}/{area_id}/{id}")))
    }

    fn create_device(&self, device: DeviceDescriptor) -> Result<DeviceDescriptor> {
        let mut tables = self.tables.write();
        if !tables
            .areas
            .contains_key(&area_key(&device.floor_id, &device.area_id))
        {
            return Err(not_found(
                "Area",
                format_args!("{}/{}", device.floor_id, device.area_id),
            ));
        }
        let key = device_key(&device.floor_id, &device.area_id, &device.id);
        if tables.devices.contains_key(&key) {
            return Err(conflict("Device", device.path()));
        }
        let _ = tables.devices.insert(key, device.clone());
        Ok(device)
    }

    fn update_device(&self, device: DeviceDescriptor) -> Result<DeviceDescriptor> {
        let mut tables = self.tables.write();
        let stored = tables
            .devices
            .get_mut(&device_key(&device.floor_id, &device.area_id, &device.id))
            .ok_or_else(|| not_found("Device", device.path()))?;
        stored.clone_from(&device);
        Ok(device)
    }

    fn delete_device(&self, floor_id: &str, area_id: &str, id: &str) -> Result<DeviceDescriptor> {
        self.tables
            .write()
            .devices
            .shift_remove(&device_key(floor_id, area_id, id))
            .ok_or_else(|| not_found("Device", format_args!("{floor_id}/{area_id}/{id}")))
    }

    fn policies(&self) -> Vec<Policy> {
        self.tables.read().policies.values().cloned().collect()
    }

    fn area_policies(&self, floor_id: &str, area_id: &str) -> Vec<Policy> {
        self.tables
            .read()
            .policies
            .values()
            .filter(|policy| policy.floor_id == floor_id && policy.area_id == area_id)
            .cloned()
            .collect()
    }

    fn policy(&self, id: Uuid) -> Result<Policy> {
        self.tables
            .read()
            .policies
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("Policy", id))
    }

    fn create_policy(&self, mut policy: Policy) -> Result<Policy> {
        let mut tables = self.tables.write();
        if !tables
            .areas
            .contains_key(&area_key(&policy.floor_id, &policy.area_id))
        {
            return Err(not_found(
                "Area",
                format_args!("{}/{}", policy.floor_id, policy.area_id),
            ));
        }
        if policy.id.is_nil() {
            policy.id = Uuid::new_v4();
        } else if tables.policies.contains_key(&policy.id) {
            return Err(conflict("Policy", policy.id));
        }
        let _ = tables.policies.insert(policy.id, policy.clone());
        Ok(policy)
    }

    fn update_policy(&self, policy: Policy) -> Result<Policy> {
        let mut tables = self.tables.write();
        let stored = tables
            .policies
            .get_mut(&policy.id)
            .ok_or_else(|| not_found("Policy", policy.id))?;
        stored.clone_from(&policy);
        Ok(policy)
    }

    fn delete_policy(&self, id: Uuid) -> Result<Policy> {
        self.tables
            .write()
            .policies
            .shift_remove(&id)
            .ok_or_else(|| not_found("Policy", id))
    }

    fn users(&self) -> Vec<User> {
        self.tables.read().users.values().cloned().collect()
    }

    fn user(&self, username: &str) -> Result<User> {
        self.tables
            .read()
            .users
            .get(username)
            .cloned()
            .ok_or_else(|| not_found("User", username))
    }

    fn create_user(&self, user: User) -> Result<User> {
        let mut tables = self.tables.write();
        if tables.users.contains_key(&user.username) {
            return Err(conflict("User", &user.username));
        }
        let _ = tables.users.insert(user.username.clone(), user.clone());
        Ok(user)
    }

    fn update_user(&self, user: User) -> Result<User> {
        let mut tables = self.tables.write();
        let stored = tables
            .users
            .get_mut(&user.username)
            .ok_or_else(|| not_found("User", &user.username))?;
        stored.clone_from(&user);
        Ok(user)
    }

    fn delete_user(&self, username: &str) -> Result<User> {
        self.tables
            .write()
            .users
            .shift_remove(username)
            .ok_or_else(|| not_found("User", username))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use storey::device::DeviceKind;

    use uuid::Uuid;

    use crate::error::ErrorKind;

    use super::{
        Area, DeviceDescriptor, Floor, InMemoryInventory, Inventory, Policy, Role, User,
    };

    // Floor `1`, area `1`, with the devices of the test building.
    pub(crate) fn building_inventory() -> InMemoryInventory {
        let inventory = InMemoryInventory::new();
        let _ = inventory.create_floor(Floor::new("1", "Ground")).unwrap();
        let _ = inventory.create_area(Area::new("1", "1", "Hall")).unwrap();
        for (id, kind) in [
            ("cam", DeviceKind::Camera),
            ("lamp", DeviceKind::Light),
            ("siren", DeviceKind::Alarm),
        ] {
            let _ = inventory
                .create_device(DeviceDescriptor::new("1", "1", id, kind))
                .unwrap();
        }
        inventory
    }

    #[test]
    fn test_layout() {
        let inventory = building_inventory();

        assert_eq!(inventory.floors(), [Floor::new("1", "Ground")]);
        assert_eq!(
            inventory.create_floor(Floor::new("1", "Other")).unwrap_err().kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            inventory.create_area(Area::new("9", "1", "Nowhere")).unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let lamp = inventory.device("1", "1", "lamp").unwrap();
        assert_eq!(lamp.kind, DeviceKind::Light);
        assert_eq!(lamp.path(), "floor/1/area/1/device/lamp");
        assert_eq!(lamp.resource_path(), "floor/1/area/1/device/lamp/switch");
        assert_eq!(inventory.devices("1", "1").len(), 3);

        let _ = inventory
            .update_area(Area::new("1", "1", "Lobby"))
            .unwrap();
        assert_eq!(inventory.area("1", "1").unwrap().name, "Lobby");
        assert_eq!(
            inventory.update_floor(Floor::new("2", "Missing")).unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let _ = inventory.delete_device("1", "1", "cam").unwrap();
        assert_eq!(inventory.devices("1", "1").len(), 2);
        assert_eq!(
            inventory.delete_device("1", "1", "cam").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_floor_delete_cascades() {
        let inventory = building_inventory();
        let policy = inventory
            .create_policy(Policy::new("1", "1", "night"))
            .unwrap();

        let _ = inventory.delete_floor("1").unwrap();
        assert!(inventory.floors().is_empty());
        assert!(inventory.areas("1").is_empty());
        assert!(inventory.devices("1", "1").is_empty());
        assert_eq!(
            inventory.policy(policy.id).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_policies() {
        let inventory = building_inventory();

        let policy = inventory
            .create_policy(Policy::new("1", "1", "night"))
            .unwrap();
        assert!(!policy.id.is_nil());
        assert!(policy.enabled);
        assert_eq!(inventory.area_policies("1", "1"), [policy.clone()]);
        assert!(inventory.area_policies("1", "2").is_empty());

        assert_eq!(
            inventory.create_policy(policy.clone()).unwrap_err().kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            inventory
                .create_policy(Policy::new("1", "7", "nowhere"))
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );

        let mut disabled = policy.clone();
        disabled.enabled = false;
        let _ = inventory.update_policy(disabled).unwrap();
        assert!(!inventory.policy(policy.id).unwrap().enabled);

        let _ = inventory.delete_policy(policy.id).unwrap();
        assert!(inventory.policies().is_empty());
        assert_eq!(
            inventory.delete_policy(Uuid::new_v4()).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_users() {
        let inventory = InMemoryInventory::new();

        let _ = inventory.create_user(User::new("ada", Role::Admin)).unwrap();
        assert_eq!(
            inventory
                .create_user(User::new("ada", Role::Operator))
                .unwrap_err()
                .kind(),
            ErrorKind::Conflict
        );

        let _ = inventory
            .update_user(User::new("ada", Role::Operator))
            .unwrap();
        assert_eq!(inventory.user("ada").unwrap().role, Role::Operator);
        assert_eq!(inventory.users().len(), 1);

        let _ = inventory.delete_user("ada").unwrap();
        assert_eq!(inventory.user("ada").unwrap_err().kind(), ErrorKind::NotFound);
    }
}

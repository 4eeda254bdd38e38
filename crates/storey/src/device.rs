use serde::Serialize;

use crate::attributes::Interface;

/// All [`DeviceKind`]s.
pub const ALL_DEVICE_KINDS: &[DeviceKind] = &[
    DeviceKind::Camera,
    DeviceKind::Pir,
    DeviceKind::Temperature,
    DeviceKind::Light,
    DeviceKind::Alarm,
];

/// Kinds of building devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// A camera counting the people in an area.
    Camera,
    /// A passive infrared sensor detecting presence.
    Pir,
    /// A temperature sensor.
    Temperature,
    /// A switchable light.
    Light,
    /// A switchable alarm.
    Alarm,
}

impl core::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.as_str().fmt(f)
    }
}

impl DeviceKind {
    /// Returns the device kind name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Camera => "camera",
            Self::Pir => "pir",
            Self::Temperature => "temperature",
            Self::Light => "light",
            Self::Alarm => "alarm",
        }
    }

    /// Parses a device kind name, ignoring case.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        ALL_DEVICE_KINDS
            .iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
            .copied()
    }

    /// Returns the resource type of the device container.
    #[must_use]
    pub const fn device_type(self) -> &'static str {
        match self {
            Self::Camera => "iot.device.camera",
            Self::Pir => "iot.device.pir",
            Self::Temperature => "iot.device.temperature",
            Self::Light => "iot.device.light",
            Self::Alarm => "iot.device.alarm",
        }
    }

    /// Returns the resource type of the device leaf resource.
    #[must_use]
    pub const fn resource_type(self) -> &'static str {
        match self {
            Self::Camera => "iot.sensor.camera",
            Self::Pir => "iot.sensor.pir",
            Self::Temperature => "iot.sensor.temperature",
            Self::Light => "iot.actuator.light",
            Self::Alarm => "iot.actuator.alarm",
        }
    }

    /// Returns the name of the device leaf resource.
    #[must_use]
    pub const fn resource_name(self) -> &'static str {
        match self {
            Self::Camera => "people",
            Self::Pir => "presence",
            Self::Temperature => "temperature",
            Self::Light | Self::Alarm => "switch",
        }
    }

    /// Returns the measurement unit of the leaf resource, if any.
    #[must_use]
    pub const fn unit(self) -> Option<&'static str> {
        match self {
            Self::Camera => Some("count"),
            Self::Temperature => Some("Cel"),
            Self::Pir | Self::Light | Self::Alarm => None,
        }
    }

    /// Checks whether the leaf resource can be written.
    #[must_use]
    pub const fn is_actuator(self) -> bool {
        matches!(self, Self::Light | Self::Alarm)
    }

    /// Returns the interface of the leaf resource.
    #[must_use]
    pub const fn interface(self) -> Interface {
        if self.is_actuator() {
            Interface::Actuator
        } else {
            Interface::Sensor
        }
    }
}

/// Kinds of composite resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum ContainerKind {
    /// The building, root of the tree.
    Building,
    /// A floor of the building.
    Floor,
    /// An area of a floor.
    Area,
    /// A device of an area.
    Device(DeviceKind),
}

impl ContainerKind {
    /// Returns the resource type.
    #[must_use]
    pub const fn resource_type(self) -> &'static str {
        match self {
            Self::Building => "iot.building",
            Self::Floor => "iot.floor",
            Self::Area => "iot.area",
            Self::Device(kind) => kind.device_type(),
        }
    }

    /// Returns the path segment preceding the identifiers of the children,
    /// such as `floor` in `floor/1`.
    ///
    /// Devices have no such segment, since their children are named
    /// resources.
    #[must_use]
    pub const fn child_segment(self) -> Option<&'static str> {
        match self {
            Self::Building => Some("floor"),
            Self::Floor => Some("area"),
            Self::Area => Some("device"),
            Self::Device(_) => None,
        }
    }

    /// Returns the kind of container created below this one, if any.
    #[must_use]
    pub const fn child_kind(self) -> Option<Self> {
        match self {
            Self::Building => Some(Self::Floor),
            Self::Floor => Some(Self::Area),
            Self::Area | Self::Device(_) => None,
        }
    }
}

#[cfg(test)]
#[cfg(feature = "deserialize")]
mod tests {
    use serde_json::json;

    use crate::{deserialize, serialize};

    use super::{ALL_DEVICE_KINDS, ContainerKind, DeviceKind, Interface};

    #[test]
    fn test_device_kind() {
        for kind in ALL_DEVICE_KINDS {
            assert_eq!(DeviceKind::parse(kind.as_str()), Some(*kind));
            assert_eq!(deserialize::<DeviceKind>(serialize(kind)), *kind);
        }

        assert_eq!(DeviceKind::parse(" Light "), Some(DeviceKind::Light));
        assert_eq!(DeviceKind::parse("thermostat"), None);
        assert_eq!(serialize(DeviceKind::Pir), json!("pir"));
    }

    #[test]
    fn test_device_resources() {
        assert_eq!(DeviceKind::Camera.resource_name(), "people");
        assert_eq!(DeviceKind::Camera.resource_type(), "iot.sensor.camera");
        assert_eq!(DeviceKind::Camera.interface(), Interface::Sensor);

        assert_eq!(DeviceKind::Alarm.resource_name(), "switch");
        assert!(DeviceKind::Alarm.is_actuator());
        assert_eq!(DeviceKind::Light.interface(), Interface::Actuator);
        assert_eq!(DeviceKind::Light.unit(), None);
    }

    #[test]
    fn test_container_kind() {
        assert_eq!(ContainerKind::Building.child_kind(), Some(ContainerKind::Floor));
        assert_eq!(ContainerKind::Floor.child_segment(), Some("area"));
        assert_eq!(ContainerKind::Area.child_kind(), None);
        assert_eq!(
            ContainerKind::Device(DeviceKind::Pir).resource_type(),
            "iot.device.pir"
        );
        assert_eq!(ContainerKind::Device(DeviceKind::Pir).child_segment(), None);
    }
}

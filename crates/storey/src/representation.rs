use alloc::string::String;
use alloc::vec::Vec;

use serde::Serialize;

use crate::content::ContentFormat;
use crate::device::ContainerKind;

/// An encoded snapshot of a resource state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Representation {
    /// Encoding of the body.
    pub content_format: ContentFormat,
    /// Encoded body.
    pub body: String,
}

impl Representation {
    /// Creates a [`Representation`].
    #[must_use]
    #[inline]
    pub fn new(content_format: ContentFormat, body: impl Into<String>) -> Self {
        Self {
            content_format,
            body: body.into(),
        }
    }
}

/// A child listed in a [`CompositeDocument`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct ChildSummary {
    /// Path segment identifying the child.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Resource type.
    pub resource_type: String,
}

/// The `JSON` representation of a composite resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct CompositeDocument {
    /// Path segment identifying the composite.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Composite kind.
    pub kind: ContainerKind,
    /// Children, in insertion order.
    pub children: Vec<ChildSummary>,
}

impl CompositeDocument {
    /// Returns the child with the given identifier.
    #[must_use]
    pub fn child(&self, id: &str) -> Option<&ChildSummary> {
        self.children.iter().find(|child| child.id == id)
    }
}

#[cfg(test)]
#[cfg(feature = "deserialize")]
mod tests {
    use alloc::vec;

    use serde_json::json;

    use crate::deserialize;
    use crate::device::{ContainerKind, DeviceKind};

    use super::CompositeDocument;

    #[test]
    fn test_composite_document() {
        let document = deserialize::<CompositeDocument>(json!({
            "id": "1",
            "name": "area1",
            "kind": "Area",
            "children": [
                {"id": "light-1", "name": "light-1", "resource_type": "iot.device.light"},
            ]
        }));

        assert_eq!(document.kind, ContainerKind::Area);
        assert_eq!(
            document.child("light-1").map(|c| c.resource_type.as_str()),
            Some(DeviceKind::Light.device_type())
        );
        assert!(document.child("camera-1").is_none());
        assert_eq!(document.children, vec![document.children[0].clone()]);
    }
}

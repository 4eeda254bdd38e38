use alloc::borrow::Cow;
use alloc::string::String;
use alloc::vec::Vec;

use core::fmt::{self, Write};

use serde::Serialize;

use crate::content::{ContentFormat, ContentFormats};

/// The interface a resource exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum Interface {
    /// Read-only sensor.
    #[serde(rename = "core.s")]
    Sensor,
    /// Readable and writable actuator.
    #[serde(rename = "core.a")]
    Actuator,
    /// Batch of resources.
    #[serde(rename = "core.b")]
    Batch,
    /// List of links.
    #[serde(rename = "core.ll")]
    LinkList,
}

impl Interface {
    /// Returns the interface description.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sensor => "core.s",
            Self::Actuator => "core.a",
            Self::Batch => "core.b",
            Self::LinkList => "core.ll",
        }
    }

    /// Parses an interface description.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "core.s" => Some(Self::Sensor),
            "core.a" => Some(Self::Actuator),
            "core.b" => Some(Self::Batch),
            "core.ll" => Some(Self::LinkList),
            _ => None,
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

/// Static resource attributes.
///
/// Attributes never change once a resource has been constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct ResourceAttributes {
    /// Resource type, such as `iot.sensor.camera`.
    pub resource_type: Cow<'static, str>,
    /// Resource interface.
    pub interface: Interface,
    /// Supported content formats, ordered by preference.
    pub content_formats: ContentFormats,
    /// Human readable title.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "deserialize", serde(default))]
    pub title: Option<Cow<'static, str>>,
    /// Whether the resource can be observed.
    pub observable: bool,
}

impl ResourceAttributes {
    /// Creates [`ResourceAttributes`] for a resource which is not observable.
    #[must_use]
    pub fn new(
        resource_type: impl Into<Cow<'static, str>>,
        interface: Interface,
        content_formats: ContentFormats,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            interface,
            content_formats,
            title: None,
            observable: false,
        }
    }

    /// Sets a title.
    #[must_use]
    #[inline]
    pub fn title(mut self, title: impl Into<Cow<'static, str>>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Makes the resource observable.
    #[must_use]
    #[inline]
    pub const fn observable(mut self) -> Self {
        self.observable = true;
        self
    }

    /// Checks whether the resource supports a [`ContentFormat`].
    #[must_use]
    #[inline]
    pub fn supports(&self, format: ContentFormat) -> bool {
        self.content_formats.contains(&format)
    }
}

/// A link to a resource, as listed in a link-format document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Link {
    /// Resource path, without the leading slash.
    pub path: String,
    /// Resource attributes.
    pub attributes: ResourceAttributes,
}

impl Link {
    /// Creates a [`Link`].
    #[must_use]
    pub fn new(path: impl Into<String>, attributes: ResourceAttributes) -> Self {
        Self {
            path: path.into(),
            attributes,
        }
    }

    // Parses a single `</path>;attr=value;...` entry.
    fn parse(entry: &str) -> Option<Self> {
        let mut parts = entry.trim().split(';');
        let target = parts.next()?.trim();
        let path = target.strip_prefix("</")?.strip_suffix('>')?;

        let mut resource_type = None;
        let mut interface = Interface::Sensor;
        let mut content_formats = ContentFormats::new();
        let mut title = None;
        let mut observable = false;

        for part in parts {
            let (key, value) = match part.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim().trim_matches('"')),
                None => (part.trim(), ""),
            };
            match key {
                "rt" => resource_type = Some(String::from(value)),
                "if" => interface = Interface::parse(value)?,
                "ct" => {
                    for id in value.split_whitespace() {
                        let format = ContentFormat::from_id(id.parse().ok()?)?;
                        content_formats.add(format);
                    }
                }
                "title" => title = Some(Cow::Owned(String::from(value))),
                "obs" => observable = true,
                _ => {}
            }
        }

        Some(Self {
            path: String::from(path),
            attributes: ResourceAttributes {
                resource_type: Cow::Owned(resource_type?),
                interface,
                content_formats,
                title,
                observable,
            },
        })
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attributes = &self.attributes;
        write!(
            f,
            "</{}>;rt=\"{}\";if=\"{}\"",
            self.path, attributes.resource_type, attributes.interface
        )?;

        if !attributes.content_formats.is_empty() {
            f.write_str(";ct=\"")?;
            for (i, format) in attributes.content_formats.iter().enumerate() {
                if i > 0 {
                    f.write_char(' ')?;
                }
                write!(f, "{}", format.id())?;
            }
            f.write_char('"')?;
        }

        if let Some(title) = &attributes.title {
            write!(f, ";title=\"{title}\"")?;
        }

        if attributes.observable {
            f.write_str(";obs")?;
        }

        Ok(())
    }
}

/// Renders a link-format document.
#[must_use]
pub fn render_links(links: &[Link]) -> String {
    let mut document = String::new();
    for (i, link) in links.iter().enumerate() {
        if i > 0 {
            document.push(',');
        }
        // Writing into a `String` cannot fail.
        let _ = write!(document, "{link}");
    }
    document
}

/// Parses a link-format document.
///
/// Malformed entries are skipped.
#[must_use]
pub fn parse_links(document: &str) -> Vec<Link> {
    document
        .split(',')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| {
            let link = Link::parse(entry);
            if link.is_none() {
                log::debug!("Skipping malformed link `{entry}`");
            }
            link
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;
    use alloc::vec;

    use crate::content::{ContentFormat, ContentFormats};

    use super::{Interface, Link, ResourceAttributes, parse_links, render_links};

    fn camera_link() -> Link {
        Link::new(
            "floor/1/area/1/device/camera-1/people",
            ResourceAttributes::new(
                "iot.sensor.camera",
                Interface::Sensor,
                ContentFormats::init_from_formats([
                    ContentFormat::SenmlJson,
                    ContentFormat::TextPlain,
                ]),
            )
            .title("Camera people counter")
            .observable(),
        )
    }

    fn floor_link() -> Link {
        Link::new(
            "floor/1",
            ResourceAttributes::new(
                "iot.floor",
                Interface::Batch,
                ContentFormats::init_from_formats([ContentFormat::LinkFormat]),
            ),
        )
    }

    #[test]
    fn test_render_link() {
        assert_eq!(
            camera_link().to_string(),
            "</floor/1/area/1/device/camera-1/people>;rt=\"iot.sensor.camera\";\
             if=\"core.s\";ct=\"110 0\";title=\"Camera people counter\";obs"
        );
        assert_eq!(
            floor_link().to_string(),
            "</floor/1>;rt=\"iot.floor\";if=\"core.b\";ct=\"40\""
        );
    }

    #[test]
    fn test_link_document() {
        let links = vec![floor_link(), camera_link()];
        let document = render_links(&links);

        assert_eq!(parse_links(&document), links);
        assert_eq!(render_links(&[]), "");
    }

    #[test]
    fn test_malformed_links() {
        // Missing resource type, unknown content format, and a bad target.
        let document = "</a>;if=\"core.s\",</b>;rt=\"x\";ct=\"7\",<c>;rt=\"x\",</d>;rt=\"y\"";
        let links = parse_links(document);

        assert_eq!(links.len(), 1);
        assert_eq!(links[0].path, "d");
        assert_eq!(links[0].attributes.interface, Interface::Sensor);
    }
}

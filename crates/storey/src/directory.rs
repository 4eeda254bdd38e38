use alloc::string::String;
use alloc::vec::Vec;

use serde::Serialize;

use crate::attributes::{Link, parse_links};

/// Default registration lifetime, in seconds.
pub const DEFAULT_LIFETIME: u32 = 90;

/// A registration of all resources exposed by an endpoint.
///
/// A registration replaces every entry the endpoint previously registered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Registration {
    /// Endpoint name.
    pub endpoint: String,
    /// Endpoint host.
    pub host: String,
    /// Endpoint port.
    pub port: u16,
    /// Lifetime, in seconds, after which the entries expire.
    pub lifetime: u32,
    /// Registered resources.
    pub links: Vec<Link>,
}

impl Registration {
    /// Creates a [`Registration`] with the default lifetime.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: endpoint.into(),
            host: host.into(),
            port,
            lifetime: DEFAULT_LIFETIME,
            links: Vec::new(),
        }
    }

    /// Sets the lifetime, in seconds.
    #[must_use]
    #[inline]
    pub const fn lifetime(mut self, lifetime: u32) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Sets the registered resources.
    #[must_use]
    #[inline]
    pub fn links(mut self, links: Vec<Link>) -> Self {
        self.links = links;
        self
    }
}

/// Endpoint parameters of a link-format registration.
///
/// They travel in the query string, while the body carries the
/// link-format document of the resources.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct EndpointQuery {
    /// Endpoint name.
    pub ep: String,
    /// Endpoint host.
    pub host: String,
    /// Endpoint port.
    pub port: u16,
    /// Lifetime, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "deserialize", serde(default))]
    pub lt: Option<u32>,
}

impl EndpointQuery {
    /// Builds the [`Registration`] of the links of a link-format document.
    ///
    /// Malformed links are skipped.
    #[must_use]
    pub fn registration(self, document: &str) -> Registration {
        Registration::new(self.ep, self.host, self.port)
            .lifetime(self.lt.unwrap_or(DEFAULT_LIFETIME))
            .links(parse_links(document))
    }
}

/// A resource known by the directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct DirectoryEntry {
    /// Endpoint name.
    pub endpoint: String,
    /// Endpoint host.
    pub host: String,
    /// Endpoint port.
    pub port: u16,
    /// Resource link.
    pub link: Link,
}

impl DirectoryEntry {
    /// Returns the base `URL` of the endpoint exposing the resource.
    #[must_use]
    pub fn base_url(&self) -> String {
        alloc::format!("http://{}:{}", self.host, self.port)
    }
}

/// Filters of a directory lookup.
///
/// An absent filter matches every resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct LookupQuery {
    /// Resource type.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "deserialize", serde(default))]
    pub rt: Option<String>,
    /// Resource path.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "deserialize", serde(default))]
    pub path: Option<String>,
}

impl LookupQuery {
    /// Looks up resources of a given type.
    #[must_use]
    pub fn resource_type(rt: impl Into<String>) -> Self {
        Self {
            rt: Some(rt.into()),
            path: None,
        }
    }

    /// Restricts the lookup to a resource path.
    #[must_use]
    #[inline]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Checks whether a [`Link`] satisfies the query.
    #[must_use]
    pub fn matches(&self, link: &Link) -> bool {
        self.rt
            .as_deref()
            .is_none_or(|rt| link.attributes.resource_type == rt)
            && self.path.as_deref().is_none_or(|path| link.path == path)
    }
}

#[cfg(test)]
mod tests {
    use crate::attributes::{Interface, Link, ResourceAttributes};
    use crate::content::{ContentFormat, ContentFormats};

    use super::{DEFAULT_LIFETIME, DirectoryEntry, EndpointQuery, LookupQuery, Registration};

    fn floor_link(path: &str) -> Link {
        Link::new(
            path,
            ResourceAttributes::new(
                "iot.floor",
                Interface::Batch,
                ContentFormats::init_from_formats([ContentFormat::Json]),
            )
            .observable(),
        )
    }

    #[test]
    fn test_lookup_query() {
        let link = floor_link("floor/1");

        assert!(LookupQuery::default().matches(&link));
        assert!(LookupQuery::resource_type("iot.floor").matches(&link));
        assert!(
            LookupQuery::resource_type("iot.floor")
                .path("floor/1")
                .matches(&link)
        );
        assert!(!LookupQuery::resource_type("iot.area").matches(&link));
        assert!(!LookupQuery::default().path("floor/2").matches(&link));
    }

    #[test]
    fn test_registration() {
        let registration = Registration::new("building", "127.0.0.1", 5683)
            .links(alloc::vec![floor_link("floor/1")]);
        assert_eq!(registration.lifetime, DEFAULT_LIFETIME);
        assert_eq!(registration.lifetime(10).lifetime, 10);

        let entry = DirectoryEntry {
            endpoint: "building".into(),
            host: "127.0.0.1".into(),
            port: 5683,
            link: floor_link("floor/1"),
        };
        assert_eq!(entry.base_url(), "http://127.0.0.1:5683");
    }

    #[test]
    fn test_link_format_registration() {
        let query = EndpointQuery {
            ep: "building".into(),
            host: "127.0.0.1".into(),
            port: 8080,
            lt: None,
        };
        let registration = query.clone().registration(
            "</floor/1>;rt=\"iot.floor\";if=\"core.b\";ct=\"50\";obs,<broken>",
        );
        assert_eq!(registration.endpoint, "building");
        assert_eq!(registration.lifetime, DEFAULT_LIFETIME);
        assert_eq!(registration.links, [floor_link("floor/1")]);

        let registration = EndpointQuery {
            lt: Some(30),
            ..query
        }
        .registration("");
        assert_eq!(registration.lifetime, 30);
        assert!(registration.links.is_empty());
    }
}

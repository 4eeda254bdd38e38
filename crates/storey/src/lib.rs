//! The communication interface among `storey` devices, the resource directory,
//! and controllers.
//!
//! This crate provides APIs to:
//!
//! - Negotiate the encoding of a resource representation. A device exposes
//!   each resource in one or more content formats, and a requester lists the
//!   formats it accepts.
//! - Encode and decode sensor measurements as `SenML`-like documents, the
//!   preferred structured encoding, with plain text as a fallback.
//! - Describe resources through static attributes (resource type, interface,
//!   content formats, observability) and render them as link-format entries
//!   for discovery.
//! - Exchange observe notifications and directory registrations.
//! - Report errors with a common set of kinds.
//!
//! Data exchange between devices and controllers requires structures to be
//! serializable and deserializable. A device can avoid importing
//! deserialization functions by disabling the `deserialize` feature at
//! compile time.
//!
//! This crate can be compiled for both `std` and `no_std` environments.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

mod macros;

/// Static resource attributes and link-format rendering.
pub mod attributes;
/// Content formats and their negotiation.
pub mod content;
/// Kinds of building devices and containers.
pub mod device;
/// Directory registration and lookup data.
pub mod directory;
/// Observe notifications and subscription requests.
pub mod notification;
/// Encoded resource snapshots and composite documents.
pub mod representation;
/// Responses and error kinds shared by every component.
pub mod response;
/// `SenML`-like measurement documents.
pub mod senml;
/// Values carried by raw resources.
pub mod value;

#[cfg(test)]
#[cfg(feature = "deserialize")]
pub(crate) fn serialize<T: serde::Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap()
}

#[cfg(test)]
#[cfg(feature = "deserialize")]
pub(crate) fn deserialize<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> T {
    serde_json::from_value(value).unwrap()
}

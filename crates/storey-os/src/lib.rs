//! The `storey-os` library crate simulates the devices of a building on
//! operating systems and exposes them as observable resources.
//!
//! A building is a [`tree::ResourceTree`] of floors, areas, and devices.
//! Each device owns a typed [`raw::RawResource`], possibly moved by a
//! [`simulator::PeriodicSimulator`], and wrapped into a
//! [`resource::ResourceNode`] which:
//!
//! - Negotiates the encoding of reads and observe notifications
//! - Notifies its observers once per accepted change, with strictly
//!   increasing sequence numbers
//! - Sends a terminal notification when deleted
//!
//! The tree is served over `HTTP` by a [`server::DeviceServer`] and kept
//! registered in a resource directory by a [`registrar::Registrar`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Device provisioning settings.
pub mod devices;
/// Error management.
pub mod error;
/// Observe relations and notification delivery.
pub mod observe;
/// Typed resources with change listeners.
pub mod raw;
/// Directory registration.
pub mod registrar;
/// Resource nodes.
pub mod resource;
/// Error responses.
pub mod response;
/// `HTTP` server.
pub mod server;
/// Periodic value simulation.
pub mod simulator;
/// Building resource tree.
pub mod tree;

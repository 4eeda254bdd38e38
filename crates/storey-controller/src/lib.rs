//! The `storey-controller` library crate discovers the floors of a building
//! through a resource directory, observes them, and commands their devices.
//!
//! Core functionalities of this crate include:
//!
//! - Looking up the registered floors and keeping the lookup fresh
//! - Observing each floor and maintaining a local cache of floors and areas,
//!   updated only from the pushed notifications
//! - Sending read, write, create, and delete requests to the devices exposing
//!   a path
//! - Storing the building records and the area policies, and switching off
//!   the lights and the alarms of an area when its policy is disabled
//!
//! `tokio` runs the notification listener and the directory refresh as
//! background tasks, so reading the cache never waits for the network.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Locally cached view of the observed floors.
pub mod cache;
/// Discovery and observe client.
pub mod discovery;
/// Error management.
pub mod error;
/// Building records and their storage.
pub mod inventory;
/// Policy deactivation rule.
pub mod policy;

#[cfg(test)]
mod tests;

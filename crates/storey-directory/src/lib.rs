//! The `storey-directory` library crate provides a resource directory for
//! `storey` devices.
//!
//! Devices register the link-format description of their resources together
//! with a lifetime, and renew the registration before it expires. Controllers
//! look resources up by resource type and path to find where to send their
//! requests and subscriptions.
//!
//! The crate offers:
//!
//! - An in-memory [`registry::Registry`] with per-endpoint lifetimes
//! - An `HTTP` [`service::DirectoryService`] exposing the registry
//! - A [`client::DirectoryClient`] to register and look up resources

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Directory client.
pub mod client;
/// Error management.
pub mod error;
/// In-memory registry of endpoint resources.
pub mod registry;
/// `HTTP` directory service.
pub mod service;

use std::time::{Duration, Instant};

use storey::attributes::Link;
use storey::directory::{DirectoryEntry, LookupQuery, Registration};

use indexmap::IndexMap;

use parking_lot::Mutex;

use tracing::{debug, info};

#[derive(Debug)]
struct EndpointRecord {
    host: String,
    port: u16,
    links: Vec<Link>,
    expires_at: Instant,
}

impl EndpointRecord {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// An in-memory registry of the resources exposed by every endpoint.
///
/// Each registration replaces the previous entries of the same endpoint and
/// expires once its lifetime elapses.
#[derive(Debug, Default)]
pub struct Registry {
    endpoints: Mutex<IndexMap<String, EndpointRecord>>,
}

impl Registry {
    /// Creates an empty [`Registry`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers all resources of an endpoint.
    ///
    /// Registering the same data twice leaves the registry unchanged, apart
    /// from the renewed lifetime.
    pub fn register(&self, registration: Registration) {
        self.register_at(registration, Instant::now());
    }

    /// Looks up the live resources matching a [`LookupQuery`].
    ///
    /// Entries are returned in endpoint registration order, then in link
    /// order.
    #[must_use]
    pub fn lookup(&self, query: &LookupQuery) -> Vec<DirectoryEntry> {
        self.lookup_at(query, Instant::now())
    }

    /// Removes expired endpoints and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    /// Returns the number of registered endpoints, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.lock().len()
    }

    /// Checks whether no endpoint is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.lock().is_empty()
    }

    fn register_at(&self, registration: Registration, now: Instant) {
        let Registration {
            endpoint,
            host,
            port,
            lifetime,
            links,
        } = registration;

        info!(
            "Registering {} resources of endpoint `{endpoint}` at {host}:{port} for {lifetime}s",
            links.len()
        );

        let record = EndpointRecord {
            host,
            port,
            links,
            expires_at: now + Duration::from_secs(u64::from(lifetime)),
        };

        let _ = self.endpoints.lock().insert(endpoint, record);
    }

    fn lookup_at(&self, query: &LookupQuery, now: Instant) -> Vec<DirectoryEntry> {
        let endpoints = self.endpoints.lock();
        endpoints
            .iter()
            .filter(|(_, record)| !record.is_expired(now))
            .flat_map(|(endpoint, record)| {
                record
                    .links
                    .iter()
                    .filter(|link| query.matches(link))
                    .map(|link| DirectoryEntry {
                        endpoint: endpoint.clone(),
                        host: record.host.clone(),
                        port: record.port,
                        link: link.clone(),
                    })
            })
            .collect()
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let mut endpoints = self.endpoints.lock();
        let before = endpoints.len();
        endpoints.retain(|endpoint, record| {
            let expired = record.is_expired(now);
            if expired {
                debug!("Endpoint `{endpoint}` expired");
            }
            !expired
        });
        before - endpoints.len()
    }
}

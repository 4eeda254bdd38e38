use std::time::Duration;

use storey::directory::{DirectoryEntry, LookupQuery, Registration};

use tracing::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::service::{LOOKUP_ROUTE, REGISTER_ROUTE};

// Default time bound of a directory request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A client for a resource directory.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl DirectoryClient {
    /// Creates a [`DirectoryClient`] for the directory at the given base `URL`,
    /// for example `http://127.0.0.1:5683`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            client: reqwest::Client::new(),
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Sets the time bound of each request.
    #[must_use]
    #[inline]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the directory base `URL`.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Registers all resources of an endpoint.
    ///
    /// # Errors
    ///
    /// An error is returned when the directory cannot be reached within the
    /// timeout or refuses the registration.
    pub async fn register(&self, registration: &Registration) -> Result<()> {
        debug!(
            "Registering endpoint `{}` with {} links",
            registration.endpoint,
            registration.links.len()
        );

        let response = self
            .client
            .post(format!("{}{REGISTER_ROUTE}", self.base_url))
            .timeout(self.timeout)
            .json(registration)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::new(
                ErrorKind::Response,
                format!("Registration refused with status {}", response.status()),
            ));
        }

        Ok(())
    }

    /// Looks up the resources matching a [`LookupQuery`].
    ///
    /// # Errors
    ///
    /// An error is returned when the directory cannot be reached within the
    /// timeout or replies with an invalid body.
    pub async fn lookup(&self, query: &LookupQuery) -> Result<Vec<DirectoryEntry>> {
        let response = self
            .client
            .get(format!("{}{LOOKUP_ROUTE}", self.base_url))
            .timeout(self.timeout)
            .query(query)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}

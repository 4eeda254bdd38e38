use std::time::Duration;

use storey::directory::{DEFAULT_LIFETIME, Registration};

use storey_directory::client::DirectoryClient;

use tokio::task::JoinHandle;

use tokio_util::sync::CancellationToken;

use tracing::{debug, info, warn};

use crate::tree::ResourceTree;

// Wait before retrying a failed registration.
const RETRY: Duration = Duration::from_secs(1);
// Upper bound of the wait between two failed registrations.
const MAX_RETRY: Duration = Duration::from_secs(30);

/// Keeps the resources of a [`ResourceTree`] registered in a resource
/// directory.
///
/// A registration is sent at start, after every structural change of the
/// tree, and before the previous registration expires. Changes happening
/// while a registration is in flight are coalesced into a single one.
#[derive(Debug, Clone)]
pub struct Registrar {
    client: DirectoryClient,
    endpoint: String,
    host: String,
    port: u16,
    lifetime: u32,
    retry: Duration,
    max_retry: Duration,
}

impl Registrar {
    /// Creates a [`Registrar`] announcing the tree as reachable at
    /// `http://{host}:{port}`.
    #[must_use]
    pub fn new(
        client: DirectoryClient,
        endpoint: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            host: host.into(),
            port,
            lifetime: DEFAULT_LIFETIME,
            retry: RETRY,
            max_retry: MAX_RETRY,
        }
    }

    /// Sets the registration lifetime, in seconds.
    #[must_use]
    #[inline]
    pub const fn lifetime(mut self, lifetime: u32) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Sets the wait before the first retry of a failed registration and
    /// its upper bound.
    #[must_use]
    #[inline]
    pub const fn retry(mut self, retry: Duration, max_retry: Duration) -> Self {
        self.retry = retry;
        self.max_retry = max_retry;
        self
    }

    /// Builds the registration describing the current tree.
    #[must_use]
    pub fn registration(&self, tree: &ResourceTree) -> Registration {
        Registration::new(self.endpoint.as_str(), self.host.as_str(), self.port)
            .lifetime(self.lifetime)
            .links(tree.links())
    }

    /// Runs the registrations in a background task, until the shutdown
    /// token is cancelled.
    #[must_use]
    pub fn spawn(self, tree: ResourceTree, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(tree, shutdown))
    }

    async fn run(self, tree: ResourceTree, shutdown: CancellationToken) {
        let mut requests = tree.registration_requests();
        let refresh = Duration::from_secs(u64::from(self.lifetime.max(2) / 2));
        let mut retry = self.retry;

        loop {
            // Every change seen so far is covered by the next registration.
            let _ = *requests.borrow_and_update();

            let wait = match self.client.register(&self.registration(&tree)).await {
                Ok(()) => {
                    info!(
                        "Endpoint `{}` registered at `{}`",
                        self.endpoint,
                        self.client.base_url()
                    );
                    retry = self.retry;
                    refresh
                }
                Err(e) => {
                    warn!(
                        "Registration of endpoint `{}` failed, retrying in {retry:?}: {e}",
                        self.endpoint
                    );
                    let wait = retry;
                    retry = retry.saturating_mul(2).min(self.max_retry);
                    wait
                }
            };

            tokio::select! {
                () = shutdown.cancelled() => break,
                changed = requests.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    debug!("Tree of endpoint `{}` changed", self.endpoint);
                }
                () = tokio::time::sleep(wait) => {}
            }
        }

        debug!("Registrar of endpoint `{}` stopped", self.endpoint);
    }
}

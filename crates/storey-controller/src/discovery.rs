use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use storey::content::{Accept, ContentFormat};
use storey::device::ContainerKind;
use storey::directory::{DirectoryEntry, LookupQuery};
use storey::notification::{Notification, SubscribeRequest, UnsubscribeRequest};
use storey::representation::Representation;
use storey::response::{Created, ErrorResponse};

use storey_directory::client::DirectoryClient;

use axum::{Router, extract::{Json, State}, http::StatusCode, routing::post};

use futures_util::future::join_all;

use indexmap::IndexMap;

use parking_lot::Mutex;

use reqwest::header::{ACCEPT, CONTENT_TYPE};

use tokio::net::TcpListener;
use tokio::sync::watch;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use tracing::{debug, error, info, warn};

use uuid::Uuid;

use crate::cache::{AreaView, FloorView, ObservedCache};
use crate::error::{Error, ErrorKind, Result};

/// Route receiving the notifications.
pub const NOTIFY_ROUTE: &str = "/notify";

// Default time bound of a device request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
// Default period between two directory lookups.
const REFRESH_PERIOD: Duration = Duration::from_secs(30);
// Default wait before retrying a failed lookup.
const RETRY: Duration = Duration::from_secs(1);
// Default upper bound of the wait between two failed lookups.
const MAX_RETRY: Duration = Duration::from_secs(30);

/// States of a [`DiscoveryClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    /// The client has not been started.
    Uninitialized,
    /// The first directory lookup is in progress.
    Querying,
    /// The client waits for notifications.
    Subscribed,
    /// A notification is being applied to the cache.
    Updating,
    /// The client has been shut down.
    Terminated,
}

impl std::fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => "Uninitialized".fmt(f),
            Self::Querying => "Querying".fmt(f),
            Self::Subscribed => "Subscribed".fmt(f),
            Self::Updating => "Updating".fmt(f),
            Self::Terminated => "Terminated".fmt(f),
        }
    }
}

#[derive(Debug, Clone)]
struct Subscription {
    base_url: String,
    token: String,
}

// State shared with the notification listener and the refresh task.
#[derive(Debug)]
struct Shared {
    directory: DirectoryClient,
    http: reqwest::Client,
    request_timeout: Duration,
    cache: ObservedCache,
    state: watch::Sender<DiscoveryState>,
    callback: OnceLock<String>,
    subscriptions: Mutex<IndexMap<String, Subscription>>,
}

impl Shared {
    fn set_state(&self, next: DiscoveryState) {
        let _ = self.state.send_if_modified(|state| {
            // A terminated client never comes back.
            if *state == DiscoveryState::Terminated || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    fn is_current(&self, notification: &Notification) -> bool {
        self.subscriptions
            .lock()
            .get(&notification.path)
            .is_some_and(|subscription| subscription.token == notification.token)
    }

    // Looks up the floors, seeds the cache and observes the new ones.
    async fn synchronize(&self) -> Result<()> {
        let entries = self
            .directory
            .lookup(&LookupQuery::resource_type(
                ContainerKind::Floor.resource_type(),
            ))
            .await?;

        self.cache.seed(&entries);

        let paths = entries
            .iter()
            .map(|entry| entry.link.path.clone())
            .collect::<Vec<_>>();
        for path in self.cache.retain(&paths) {
            let _ = self.subscriptions.lock().shift_remove(&path);
            info!("Floor `/{path}` is no longer registered");
        }

        let pending = {
            let subscriptions = self.subscriptions.lock();
            entries
                .iter()
                .filter(|entry| {
                    subscriptions
                        .get(&entry.link.path)
                        .is_none_or(|subscription| subscription.base_url != entry.base_url())
                })
                .collect::<Vec<_>>()
        };

        for (entry, result) in pending
            .iter()
            .zip(join_all(pending.iter().map(|entry| self.subscribe(entry))).await)
        {
            if let Err(e) = result {
                warn!("Observe of `/{}` failed: {e}", entry.link.path);
            }
        }

        self.set_state(DiscoveryState::Subscribed);
        Ok(())
    }

    async fn subscribe(&self, entry: &DirectoryEntry) -> Result<()> {
        let Some(callback) = self.callback.get() else {
            return Err(Error::new(
                ErrorKind::State,
                "Notification listener not started",
            ));
        };

        let path = entry.link.path.clone();
        let subscription = Subscription {
            base_url: entry.base_url(),
            token: Uuid::new_v4().to_string(),
        };
        let request = SubscribeRequest {
            path: path.clone(),
            callback: callback.clone(),
            token: subscription.token.clone(),
            accept: Accept::only(ContentFormat::Json),
        };

        // The new relation restarts the sequence numbering.
        self.cache.reset_sequence(&path);
        let _ = self
            .subscriptions
            .lock()
            .insert(path.clone(), subscription.clone());

        let snapshot = async {
            let response = self
                .http
                .post(format!("{}/observe", subscription.base_url))
                .timeout(self.request_timeout)
                .json(&request)
                .send()
                .await?;
            Ok::<Notification, Error>(device_response(response).await?.json().await?)
        }
        .await;

        match snapshot {
            Ok(snapshot) => {
                debug!(
                    "Observing `/{path}` at `{}` with token `{}`",
                    subscription.base_url, subscription.token
                );
                let _ = self.cache.apply(&snapshot);
                Ok(())
            }
            Err(e) => {
                let mut subscriptions = self.subscriptions.lock();
                if subscriptions
                    .get(&path)
                    .is_some_and(|current| current.token == subscription.token)
                {
                    let _ = subscriptions.shift_remove(&path);
                }
                Err(e)
            }
        }
    }

    async fn unsubscribe(&self, path: String, subscription: Subscription) {
        let request = UnsubscribeRequest {
            path,
            token: subscription.token,
        };
        let result = self
            .http
            .delete(format!("{}/observe", subscription.base_url))
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await;
        if let Err(e) = result {
            debug!("Unobserve of `/{}` failed: {e}", request.path);
        }
    }
}

// Turns a device error reply into an [`Error`].
async fn device_response(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await?;
    Err(match serde_json::from_str::<ErrorResponse<'_>>(&body) {
        Ok(reply) => Error::new(ErrorKind::Device(reply.error), reply.description.into_owned()),
        Err(_) => Error::new(
            ErrorKind::Response,
            format!("Unexpected status {status}: {body}"),
        ),
    })
}

fn accept_header(accept: &Accept) -> String {
    match accept {
        Accept::Any => "*/*".into(),
        Accept::Formats(formats) => formats
            .iter()
            .map(|format| format.mime())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

async fn receive(
    State(shared): State<Arc<Shared>>,
    Json(notification): Json<Notification>,
) -> StatusCode {
    if !shared.is_current(&notification) {
        debug!(
            "Notification of `/{}` with unknown token `{}` ignored",
            notification.path, notification.token
        );
        // The device evicts relations refusing their notifications.
        return StatusCode::GONE;
    }

    shared.set_state(DiscoveryState::Updating);
    if shared.cache.apply(&notification) {
        debug!(
            "Applied notification {} of `/{}`",
            notification.sequence, notification.path
        );
    }
    if notification.terminal {
        let _ = shared.subscriptions.lock().shift_remove(&notification.path);
        info!("Floor `/{}` deleted", notification.path);
    }
    shared.set_state(DiscoveryState::Subscribed);

    StatusCode::NO_CONTENT
}

/// A client discovering the floors of a building through a resource
/// directory and observing them.
///
/// The floors and their areas are kept in an [`ObservedCache`], updated only
/// by the notifications pushed by the devices. Devices resolved through the
/// cache can also be commanded directly.
#[derive(Debug)]
pub struct DiscoveryClient {
    shared: Arc<Shared>,
    callback_address: SocketAddr,
    refresh_period: Duration,
    retry: Duration,
    max_retry: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl DiscoveryClient {
    /// Creates a [`DiscoveryClient`] querying the given directory.
    ///
    /// Notifications are received on an ephemeral port of the loopback
    /// interface, see [`Self::callback_address`].
    #[must_use]
    pub fn new(directory: DirectoryClient) -> Self {
        Self {
            shared: Arc::new(Shared {
                directory,
                http: reqwest::Client::new(),
                request_timeout: REQUEST_TIMEOUT,
                cache: ObservedCache::new(),
                state: watch::Sender::new(DiscoveryState::Uninitialized),
                callback: OnceLock::new(),
                subscriptions: Mutex::new(IndexMap::new()),
            }),
            callback_address: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            refresh_period: REFRESH_PERIOD,
            retry: RETRY,
            max_retry: MAX_RETRY,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Sets the address receiving the notifications.
    ///
    /// The address must be reachable by the devices.
    #[must_use]
    #[inline]
    pub const fn callback_address(mut self, address: SocketAddr) -> Self {
        self.callback_address = address;
        self
    }

    /// Sets the time bound of each device request.
    ///
    /// Must be set before [`Self::start`].
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.request_timeout = timeout;
        }
        self
    }

    /// Sets the period between two directory lookups.
    #[must_use]
    #[inline]
    pub const fn refresh_period(mut self, period: Duration) -> Self {
        self.refresh_period = period;
        self
    }

    /// Sets the wait before retrying a failed lookup and its upper bound.
    #[must_use]
    #[inline]
    pub const fn retry(mut self, retry: Duration, max_retry: Duration) -> Self {
        self.retry = retry;
        self.max_retry = max_retry;
        self
    }

    /// Starts the client.
    ///
    /// Binds the notification listener, looks up the floors, observes them
    /// and then keeps following the directory in a background task.
    ///
    /// A failing first lookup is not an error: it is retried in background
    /// and [`Self::is_ready`] stays `false` until one succeeds.
    ///
    /// # Errors
    ///
    /// An error is returned when the client has already been started or
    /// when the notification listener cannot be bound.
    pub async fn start(&self) -> Result<()> {
        if self.state() != DiscoveryState::Uninitialized {
            return Err(Error::new(
                ErrorKind::State,
                format!("Cannot start a client in the `{}` state", self.state()),
            ));
        }

        let listener = TcpListener::bind(self.callback_address).await?;
        let address = listener.local_addr()?;
        let _ = self
            .shared
            .callback
            .set(format!("http://{address}{NOTIFY_ROUTE}"));

        let router = Router::new()
            .route(NOTIFY_ROUTE, post(receive))
            .with_state(Arc::clone(&self.shared));
        let shutdown = self.shutdown.clone();
        let _ = self.tracker.spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = served {
                error!("Notification listener on {address} failed: {e}");
            }
        });
        info!("Receiving notifications on {address}");

        self.shared.set_state(DiscoveryState::Querying);
        let wait = match self.shared.synchronize().await {
            Ok(()) => self.refresh_period,
            Err(e) => {
                warn!("Floor lookup failed, retrying in {:?}: {e}", self.retry);
                self.retry
            }
        };

        let _ = self.tracker.spawn(refresh(
            Arc::clone(&self.shared),
            wait,
            self.refresh_period,
            self.retry,
            self.max_retry,
            self.shutdown.clone(),
        ));

        Ok(())
    }

    /// Returns the [`DiscoveryState`].
    #[must_use]
    pub fn state(&self) -> DiscoveryState {
        *self.shared.state.borrow()
    }

    /// Returns a receiver notified of every [`DiscoveryState`] change.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<DiscoveryState> {
        self.shared.state.subscribe()
    }

    /// Returns the [`ObservedCache`].
    #[must_use]
    pub fn cache(&self) -> &ObservedCache {
        &self.shared.cache
    }

    /// Returns the observed floors.
    #[must_use]
    pub fn floors(&self) -> Vec<FloorView> {
        self.shared.cache.floors()
    }

    /// Returns the areas of an observed floor.
    #[must_use]
    pub fn areas(&self, floor_id: &str) -> Vec<AreaView> {
        self.shared.cache.areas(floor_id)
    }

    /// Checks whether the directory has been queried successfully at least
    /// once.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.cache.is_ready()
    }

    /// Reads a resource.
    ///
    /// # Errors
    ///
    /// An error is returned when no observed device exposes the path, when
    /// the device cannot be reached, or when it refuses the request.
    pub async fn read(&self, path: &str, accept: &Accept) -> Result<Representation> {
        let response = self
            .shared
            .http
            .get(self.url(path)?)
            .timeout(self.shared.request_timeout)
            .header(ACCEPT, accept_header(accept))
            .send()
            .await?;
        let response = device_response(response).await?;

        let content_format = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .and_then(|mime| ContentFormat::from_mime(mime.trim()))
            .ok_or_else(|| Error::new(ErrorKind::Response, "Missing or unknown content type"))?;

        Ok(Representation::new(content_format, response.text().await?))
    }

    /// Writes a resource.
    ///
    /// # Errors
    ///
    /// An error is returned when no observed device exposes the path, when
    /// the device cannot be reached, or when it refuses the value.
    pub async fn write(&self, path: &str, body: &str) -> Result<()> {
        let response = self
            .shared
            .http
            .put(self.url(path)?)
            .timeout(self.shared.request_timeout)
            .header(CONTENT_TYPE, ContentFormat::TextPlain.mime())
            .body(body.to_owned())
            .send()
            .await?;
        let _ = device_response(response).await?;
        Ok(())
    }

    /// Creates a child of a composite resource.
    ///
    /// # Errors
    ///
    /// An error is returned when no observed device exposes the path, when
    /// the device cannot be reached, or when it refuses the creation.
    pub async fn create(&self, path: &str, body: &str) -> Result<Created> {
        let response = self
            .shared
            .http
            .post(self.url(path)?)
            .timeout(self.shared.request_timeout)
            .header(CONTENT_TYPE, ContentFormat::TextPlain.mime())
            .body(body.to_owned())
            .send()
            .await?;
        Ok(device_response(response).await?.json().await?)
    }

    /// Deletes a resource and its children.
    ///
    /// # Errors
    ///
    /// An error is returned when no observed device exposes the path, when
    /// the device cannot be reached, or when it refuses the deletion.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let response = self
            .shared
            .http
            .delete(self.url(path)?)
            .timeout(self.shared.request_timeout)
            .send()
            .await?;
        let _ = device_response(response).await?;
        Ok(())
    }

    /// Shuts down the client.
    ///
    /// Stops the background tasks, cancels every observe relation and
    /// clears the cache.
    pub async fn shutdown(&self) {
        if self.state() == DiscoveryState::Terminated {
            return;
        }

        self.shutdown.cancel();
        let _ = self.tracker.close();
        self.tracker.wait().await;

        let subscriptions = std::mem::take(&mut *self.shared.subscriptions.lock());
        let _ = join_all(
            subscriptions
                .into_iter()
                .map(|(path, subscription)| self.shared.unsubscribe(path, subscription)),
        )
        .await;

        self.shared.cache.clear();
        self.shared.set_state(DiscoveryState::Terminated);
        info!("Discovery client stopped");
    }

    fn url(&self, path: &str) -> Result<String> {
        let path = path.trim_matches('/');
        self.shared
            .cache
            .base_url(path)
            .map(|base_url| format!("{base_url}/{path}"))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::UnknownPath,
                    format!("No observed device exposes `/{path}`"),
                )
            })
    }
}

async fn refresh(
    shared: Arc<Shared>,
    mut wait: Duration,
    period: Duration,
    initial_retry: Duration,
    max_retry: Duration,
    shutdown: CancellationToken,
) {
    let mut retry = initial_retry;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
        }

        let synchronized = tokio::select! {
            () = shutdown.cancelled() => break,
            synchronized = shared.synchronize() => synchronized,
        };

        match synchronized {
            Ok(()) => {
                retry = initial_retry;
                wait = period;
            }
            Err(e) => {
                warn!("Floor lookup failed, retrying in {retry:?}: {e}");
                wait = retry;
                retry = retry.saturating_mul(2).min(max_retry);
            }
        }
    }

    debug!("Directory refresh stopped");
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use storey::content::ContentFormat;
use storey::directory::{DirectoryEntry, EndpointQuery, LookupQuery, Registration};
use storey::response::{Ack, ErrorKind, ErrorResponse};

use axum::{
    Router,
    extract::{Json, Query, State},
    http::{HeaderMap, StatusCode, Uri, header::CONTENT_TYPE},
    routing::{get, post},
};

use tokio::net::TcpListener;

use tokio_util::sync::CancellationToken;

use tracing::{debug, info};

use crate::error::Result;
use crate::registry::Registry;

/// Registration route.
pub const REGISTER_ROUTE: &str = "/rd";
/// Resource lookup route.
pub const LOOKUP_ROUTE: &str = "/rd-lookup/res";

// How often expired endpoints are removed from the registry.
const PURGE_PERIOD: Duration = Duration::from_secs(5);

type Rejection = (StatusCode, Json<ErrorResponse<'static>>);

fn bad_request(description: &'static str, info: String) -> Rejection {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::with_description_error(
            ErrorKind::BadRequest,
            description,
            info,
        )),
    )
}

// A link-format body takes the endpoint from the query string; any other
// body is a `JSON` registration.
async fn register(
    State(registry): State<Arc<Registry>>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> std::result::Result<(StatusCode, Json<Ack>), Rejection> {
    let content_format = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(ContentFormat::from_mime);

    let registration = if content_format == Some(ContentFormat::LinkFormat) {
        let Query(endpoint) = Query::<EndpointQuery>::try_from_uri(&uri)
            .map_err(|e| bad_request("Invalid endpoint parameters", e.to_string()))?;
        endpoint.registration(&body)
    } else {
        serde_json::from_str::<Registration>(&body)
            .map_err(|e| bad_request("Invalid registration", e.to_string()))?
    };

    registry.register(registration);
    Ok((StatusCode::CREATED, Json(Ack::ok())))
}

async fn lookup(
    State(registry): State<Arc<Registry>>,
    Query(query): Query<LookupQuery>,
) -> Json<Vec<DirectoryEntry>> {
    let entries = registry.lookup(&query);
    debug!("Lookup {query:?} matched {} entries", entries.len());
    Json(entries)
}

/// The `HTTP` service of a resource directory.
///
/// - `POST /rd` registers the resources of an endpoint, either as a `JSON`
///   registration or as a link-format body with the `ep`, `host`, `port`
///   and `lt` query parameters
/// - `GET /rd-lookup/res?rt=..&path=..` looks up the live resources
#[derive(Debug)]
pub struct DirectoryService {
    registry: Arc<Registry>,
    purge_period: Duration,
}

impl Default for DirectoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryService {
    /// Creates a [`DirectoryService`] with an empty [`Registry`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            purge_period: PURGE_PERIOD,
        }
    }

    /// Sets how often expired endpoints are removed.
    #[must_use]
    #[inline]
    pub const fn purge_period(mut self, purge_period: Duration) -> Self {
        self.purge_period = purge_period;
        self
    }

    /// Returns the [`Registry`] served by the service.
    #[must_use]
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Returns the service router.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route(REGISTER_ROUTE, post(register))
            .route(LOOKUP_ROUTE, get(lookup))
            .with_state(self.registry())
    }

    /// Serves the directory on a bound listener until the shutdown token
    /// is cancelled.
    ///
    /// # Errors
    ///
    /// An error is returned when the listener fails.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let address = listener.local_addr()?;
        info!("Resource directory listening on {address}");

        let purge_token = shutdown.child_token();
        let purge = tokio::spawn(purge_expired(
            self.registry(),
            self.purge_period,
            purge_token.clone(),
        ));

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        purge_token.cancel();
        if let Err(e) = purge.await {
            tracing::error!("Failed to await the purge task: {e}");
        }

        info!("Resource directory on {address} stopped");
        served.map_err(Into::into)
    }

    /// Binds the given address and serves the directory in a background task.
    ///
    /// Returns the bound address.
    ///
    /// # Errors
    ///
    /// An error is returned when the address cannot be bound.
    pub async fn spawn(
        self,
        address: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<SocketAddr> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        let _handle = tokio::spawn(async move {
            if let Err(e) = self.run(listener, shutdown).await {
                tracing::error!("Resource directory failed: {e}");
            }
        });
        Ok(local_addr)
    }
}

async fn purge_expired(registry: Arc<Registry>, period: Duration, token: CancellationToken) {
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(period) => {
                let removed = registry.purge_expired();
                if removed > 0 {
                    debug!("Removed {removed} expired endpoints");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use storey::directory::LookupQuery;

    use reqwest::StatusCode;
    use reqwest::header::CONTENT_TYPE;

    use serial_test::serial;

    use tokio_util::sync::CancellationToken;

    use crate::client::DirectoryClient;

    use super::{DirectoryService, REGISTER_ROUTE};

    #[tokio::test]
    #[serial]
    async fn test_link_format_registration() {
        let shutdown = CancellationToken::new();
        let address = DirectoryService::new()
            .spawn(SocketAddr::from(([127, 0, 0, 1], 0)), shutdown.clone())
            .await
            .unwrap();
        let url = format!("http://{address}{REGISTER_ROUTE}");
        let http = reqwest::Client::new();

        let response = http
            .post(&url)
            .query(&[("ep", "building"), ("host", "127.0.0.1"), ("port", "8080"), ("lt", "60")])
            .header(CONTENT_TYPE, "application/link-format")
            .body("</floor/1>;rt=\"iot.floor\";if=\"core.b\";ct=\"50\";obs,</floor/1/area/1>;rt=\"iot.area\";if=\"core.b\";ct=\"50\"")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let client = DirectoryClient::new(format!("http://{address}"));
        let floors = client
            .lookup(&LookupQuery::resource_type("iot.floor"))
            .await
            .unwrap();
        assert_eq!(floors.len(), 1);
        assert_eq!(floors[0].base_url(), "http://127.0.0.1:8080");
        assert!(floors[0].link.attributes.observable);

        // The port is missing.
        let response = http
            .post(&url)
            .query(&[("ep", "building"), ("host", "127.0.0.1")])
            .header(CONTENT_TYPE, "application/link-format")
            .body("</floor/1>;rt=\"iot.floor\"")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        shutdown.cancel();
    }
}

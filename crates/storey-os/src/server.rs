use std::net::SocketAddr;

use storey::attributes::render_links;
use storey::content::{Accept, ContentFormat};
use storey::notification::{Notification, SubscribeRequest, UnsubscribeRequest};
use storey::response::{Ack, Created, ErrorKind};

use axum::{
    Router,
    extract::{Json, State, rejection::JsonRejection},
    http::{
        HeaderMap, StatusCode, Uri,
        header::{ACCEPT, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};

use tokio::net::TcpListener;

use tokio_util::sync::CancellationToken;

use tracing::{debug, info};

use crate::error::Result;
use crate::observe::Subscriber;
use crate::resource::{NodeKind, ResourceNode};
use crate::response::ErrorResponse;
use crate::tree::ResourceTree;

/// Observe route.
pub const OBSERVE_ROUTE: &str = "/observe";
/// Resource discovery route.
pub const WELL_KNOWN_CORE_ROUTE: &str = "/.well-known/core";

fn resolve(tree: &ResourceTree, uri: &Uri) -> std::result::Result<ResourceNode, ErrorResponse> {
    tree.find(uri.path())
        .ok_or_else(|| ErrorResponse::not_found(&format!("No resource at `{}`", uri.path())))
}

fn accept(headers: &HeaderMap) -> Accept {
    headers
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map_or(Accept::Any, Accept::parse)
}

// Refuses payloads in an encoding the resource does not understand.
fn check_content_type(
    node: &ResourceNode,
    headers: &HeaderMap,
) -> std::result::Result<(), ErrorResponse> {
    let Some(value) = headers.get(CONTENT_TYPE) else {
        return Ok(());
    };
    let mime = value
        .to_str()
        .ok()
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .unwrap_or_default();

    match ContentFormat::from_mime(mime) {
        Some(format) if node.attributes().supports(format) => Ok(()),
        _ => Err(ErrorResponse::with_description(
            ErrorKind::UnsupportedMediaType,
            &format!("`/{}` does not accept `{mime}` payloads", node.path()),
        )),
    }
}

async fn read(
    State(tree): State<ResourceTree>,
    uri: Uri,
    headers: HeaderMap,
) -> std::result::Result<Response, ErrorResponse> {
    let node = resolve(&tree, &uri)?;
    let representation = node.handle_read(&accept(&headers))?;
    Ok((
        [(CONTENT_TYPE, representation.content_format.mime())],
        representation.body,
    )
        .into_response())
}

async fn write(
    State(tree): State<ResourceTree>,
    uri: Uri,
    headers: HeaderMap,
    payload: String,
) -> std::result::Result<Json<Ack>, ErrorResponse> {
    let node = resolve(&tree, &uri)?;
    check_content_type(&node, &headers)?;
    Ok(Json(node.handle_write(&payload)?))
}

// Creates children on composites and writes actuators.
async fn create(
    State(tree): State<ResourceTree>,
    uri: Uri,
    headers: HeaderMap,
    payload: String,
) -> std::result::Result<Response, ErrorResponse> {
    let node = resolve(&tree, &uri)?;
    check_content_type(&node, &headers)?;
    if node.kind() == NodeKind::Actuator {
        return Ok(Json(node.handle_write(&payload)?).into_response());
    }
    let created: Created = node.handle_create(&payload)?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn remove(
    State(tree): State<ResourceTree>,
    uri: Uri,
    payload: String,
) -> std::result::Result<Json<Ack>, ErrorResponse> {
    let node = resolve(&tree, &uri)?;
    Ok(Json(node.handle_delete(&payload).await?))
}

async fn observe(
    State(tree): State<ResourceTree>,
    request: std::result::Result<Json<SubscribeRequest>, JsonRejection>,
) -> std::result::Result<Json<Notification>, ErrorResponse> {
    let Json(request) = request.map_err(|e| {
        ErrorResponse::with_description_error(
            ErrorKind::BadRequest,
            "Invalid observe request",
            &e.body_text(),
        )
    })?;

    let node = tree.find(&request.path).ok_or_else(|| {
        ErrorResponse::not_found(&format!("No resource at `/{}`", request.path))
    })?;

    let relation = node.subscribe(
        Subscriber::http(request.callback),
        request.token.as_str(),
        &request.accept,
    )?;
    info!(
        "Observing `/{}` for `{}` as {}",
        node.path(),
        relation.token,
        relation.content_format
    );

    Ok(Json(node.observe_snapshot(&relation.token)?))
}

async fn cancel_observe(
    State(tree): State<ResourceTree>,
    Json(request): Json<UnsubscribeRequest>,
) -> Json<Ack> {
    let removed = tree
        .find(&request.path)
        .is_some_and(|node| node.unsubscribe(&request.token));
    debug!(
        "Cancelled relation `{}` on `/{}`: {removed}",
        request.token, request.path
    );
    Json(Ack::ok())
}

async fn well_known_core(State(tree): State<ResourceTree>) -> Response {
    (
        [(CONTENT_TYPE, ContentFormat::LinkFormat.mime())],
        render_links(&tree.links()),
    )
        .into_response()
}

/// The `HTTP` server exposing a [`ResourceTree`].
///
/// - `GET`, `PUT`, and `DELETE` on a resource path read, write, and delete
/// - `POST` on a resource path creates a child of a composite, and writes
///   an actuator, where an empty body toggles it
/// - `POST /observe` starts observing a resource and returns its current
///   state
/// - `DELETE /observe` stops observing a resource
/// - `GET /.well-known/core` lists every resource as link-format
#[derive(Debug, Clone)]
pub struct DeviceServer {
    tree: ResourceTree,
}

impl DeviceServer {
    /// Creates a [`DeviceServer`].
    #[must_use]
    pub const fn new(tree: ResourceTree) -> Self {
        Self { tree }
    }

    /// Returns the served [`ResourceTree`].
    #[must_use]
    pub const fn tree(&self) -> &ResourceTree {
        &self.tree
    }

    /// Returns the server router.
    #[must_use]
    pub fn router(&self) -> Router {
        let resource = get(read).put(write).post(create).delete(remove);
        Router::new()
            .route(OBSERVE_ROUTE, post(observe).delete(cancel_observe))
            .route(WELL_KNOWN_CORE_ROUTE, get(well_known_core))
            .route("/", resource.clone())
            .route("/{*path}", resource)
            .with_state(self.tree.clone())
    }

    /// Serves the tree on a bound listener until the shutdown token is
    /// cancelled, then stops the tree.
    ///
    /// # Errors
    ///
    /// An error is returned when the listener fails.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let address = listener.local_addr()?;
        info!("Device server listening on {address}");

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        self.tree.shutdown().await;
        info!("Device server on {address} stopped");
        served.map_err(Into::into)
    }

    /// Binds the given address and serves the tree in a background task.
    ///
    /// Returns the bound address.
    ///
    /// # Errors
    ///
    /// An error is returned when the address cannot be bound.
    pub async fn spawn(self, address: SocketAddr, shutdown: CancellationToken) -> Result<SocketAddr> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        let _handle = tokio::spawn(async move {
            if let Err(e) = self.run(listener, shutdown).await {
                tracing::error!("Device server failed: {e}");
            }
        });
        Ok(local_addr)
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use storey::content::{Accept, ContentFormat};
    use storey::device::DeviceKind;
    use storey::notification::{Notification, SubscribeRequest, UnsubscribeRequest};
    use storey::representation::CompositeDocument;
    use storey::response::{Created, ErrorResponse};

    use axum::{Router, extract::{Json, State}, http::StatusCode, routing::post};

    use reqwest::header::{ACCEPT, CONTENT_TYPE};

    use serial_test::serial;

    use tokio::sync::mpsc;

    use tokio_util::sync::CancellationToken;

    use crate::devices::DeviceSettings;
    use crate::error::ErrorKind;
    use crate::observe::{DeliveryPolicy, Subscriber};
    use crate::tree::{ResourceTree, TreeConfig};

    use super::DeviceServer;

    async fn building(shutdown: &CancellationToken) -> (ResourceTree, String) {
        let tree = ResourceTree::with_config(
            TreeConfig::new().devices(DeviceSettings::new().without_simulation()),
        );
        let _ = tree.provision_floor("1").unwrap();
        let _ = tree.provision_area("1", "1").unwrap();
        let _ = tree
            .provision_device("1", "1", "cam", DeviceKind::Camera)
            .unwrap();
        let _ = tree
            .provision_device("1", "1", "lamp", DeviceKind::Light)
            .unwrap();

        let address = DeviceServer::new(tree.clone())
            .spawn(SocketAddr::from(([127, 0, 0, 1], 0)), shutdown.clone())
            .await
            .unwrap();
        (tree, format!("http://{address}"))
    }

    async fn callback_listener(
        shutdown: CancellationToken,
    ) -> (String, mpsc::Receiver<Notification>) {
        async fn receive(
            State(sender): State<mpsc::Sender<Notification>>,
            Json(notification): Json<Notification>,
        ) -> StatusCode {
            let _ = sender.send(notification).await;
            StatusCode::NO_CONTENT
        }

        let (tx, rx) = mpsc::channel(16);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let router = Router::new().route("/notify", post(receive)).with_state(tx);
        let _handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .unwrap();
        });
        (format!("http://{address}/notify"), rx)
    }

    #[tokio::test]
    #[serial]
    async fn test_resource_methods() {
        let shutdown = CancellationToken::new();
        let (tree, base) = building(&shutdown).await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("{base}/floor/1"))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let document: CompositeDocument = response.json().await.unwrap();
        assert_eq!(document.name, "floor1");

        let response = client
            .get(format!("{base}/floor/1/area/1/device/cam/people"))
            .header(ACCEPT, "text/plain")
            .send()
            .await
            .unwrap();
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            ContentFormat::TextPlain.mime()
        );
        let count: u32 = response.text().await.unwrap().parse().unwrap();
        assert!(count <= 30);

        let response = client
            .get(format!("{base}/floor/1/area/1/device/cam/people"))
            .header(ACCEPT, "application/link-format")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let response = client
            .put(format!("{base}/floor/1/area/1/device/lamp/switch"))
            .body("true")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = client
            .post(format!("{base}/floor/1/area/1/device/lamp/switch"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let switch = tree.find("floor/1/area/1/device/lamp/switch").unwrap();
        assert_eq!(
            switch
                .handle_read(&Accept::only(ContentFormat::TextPlain))
                .unwrap()
                .body,
            "false"
        );

        let response = client
            .put(format!("{base}/floor/1/area/1/device/cam/people"))
            .body("3")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let error: ErrorResponse<'_> = response.json().await.unwrap();
        assert_eq!(error.error, ErrorKind::MethodNotAllowed);

        let response = client
            .put(format!("{base}/floor/1/area/1/device/lamp/switch"))
            .header(CONTENT_TYPE, "application/json")
            .body("true")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let response = client
            .post(format!("{base}/floor/1/area/1"))
            .body("siren:alarm")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: Created = response.json().await.unwrap();
        assert_eq!(created.path, "floor/1/area/1/device/siren");

        let response = client
            .post(format!("{base}/floor/1/area/1"))
            .body("siren:alarm")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = client
            .delete(format!("{base}/floor/1/area/1/device/siren"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(tree.find("floor/1/area/1/device/siren").is_none());

        let response = client
            .get(format!("{base}/floor/1/area/1/device/siren"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = client.delete(&base).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let links = client
            .get(format!("{base}/.well-known/core"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(links.contains("</floor/1/area/1/device/cam/people>;rt=\"iot.sensor.camera\""));

        shutdown.cancel();
    }

    #[tokio::test]
    #[serial]
    async fn test_http_observe() {
        let shutdown = CancellationToken::new();
        let (_tree, base) = building(&shutdown).await;
        let (callback, mut notifications) = callback_listener(shutdown.clone()).await;
        let client = reqwest::Client::new();
        let path = "floor/1/area/1/device/lamp/switch";

        let snapshot: Notification = client
            .post(format!("{base}/observe"))
            .json(&SubscribeRequest {
                path: path.into(),
                callback,
                token: "lamp".into(),
                accept: Accept::only(ContentFormat::TextPlain),
            })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(snapshot.sequence, 0);
        assert_eq!(snapshot.representation.body, "false");

        let response = client
            .put(format!("{base}/{path}"))
            .body("")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let notification = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notification.sequence, 1);
        assert_eq!(notification.representation.body, "true");

        for _ in 0..2 {
            let response = client
                .delete(format!("{base}/observe"))
                .json(&UnsubscribeRequest {
                    path: path.into(),
                    token: "lamp".into(),
                })
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = client
            .post(format!("{base}/observe"))
            .body("{}")
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        shutdown.cancel();
    }

    #[tokio::test]
    #[serial]
    async fn test_retried_notification_precedes_terminal() {
        #[derive(Clone)]
        struct Flaky {
            failed: Arc<AtomicBool>,
            sender: mpsc::Sender<Notification>,
        }

        // Refuses the first notification it receives.
        async fn receive(
            State(flaky): State<Flaky>,
            Json(notification): Json<Notification>,
        ) -> StatusCode {
            if !flaky.failed.swap(true, Ordering::SeqCst) {
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
            let _ = flaky.sender.send(notification).await;
            StatusCode::NO_CONTENT
        }

        let shutdown = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let router = Router::new().route("/notify", post(receive)).with_state(Flaky {
            failed: Arc::new(AtomicBool::new(false)),
            sender: tx,
        });
        let server_shutdown = shutdown.clone();
        let _handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await
                .unwrap();
        });

        let tree = ResourceTree::with_config(
            TreeConfig::new()
                .policy(DeliveryPolicy::new().backoff(Duration::from_millis(300)))
                .devices(DeviceSettings::new().without_simulation()),
        );
        let _ = tree.provision_floor("1").unwrap();
        let _ = tree.provision_area("1", "1").unwrap();
        let _ = tree
            .provision_device("1", "1", "lamp", DeviceKind::Light)
            .unwrap();

        let switch = tree.find("floor/1/area/1/device/lamp/switch").unwrap();
        let _ = switch
            .subscribe(
                Subscriber::http(format!("http://{address}/notify")),
                "lamp",
                &Accept::only(ContentFormat::TextPlain),
            )
            .unwrap();

        let _ = switch.handle_write("true").unwrap();
        tree.deprovision("floor/1/area/1/device/lamp").await.unwrap();

        let mut received = Vec::new();
        while let Ok(notification) = rx.try_recv() {
            received.push((notification.sequence, notification.terminal));
        }
        assert_eq!(received, [(1, false), (2, true)]);

        shutdown.cancel();
    }
}

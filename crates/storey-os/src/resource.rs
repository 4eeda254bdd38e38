use std::borrow::Cow;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use storey::attributes::{Interface, Link, ResourceAttributes, render_links};
use storey::content::{Accept, ContentFormat, ContentFormats};
use storey::device::{ContainerKind, DeviceKind};
use storey::notification::Notification;
use storey::representation::{ChildSummary, CompositeDocument, Representation};
use storey::response::{Ack, Created};
use storey::senml::{ACTUATOR_VERSION, SenmlPack, SenmlRecord};
use storey::value::ResourceValue;

use indexmap::IndexMap;

use parking_lot::Mutex;

use tokio::sync::watch;

use tracing::{debug, info, warn};

use crate::devices::{self, DeviceSettings};
use crate::error::{Error, ErrorKind, Result};
use crate::observe::{DeliveryPolicy, ObserveRelation, Observers, Subscriber};
use crate::raw::{ListenerId, RawResource, ResourceDataListener};
use crate::simulator::PeriodicSimulator;

type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The role of a [`ResourceNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A read-only leaf resource.
    Sensor,
    /// A writable leaf resource.
    Actuator,
    /// A resource grouping child resources.
    Composite(ContainerKind),
}

// Data shared by all nodes of a tree.
#[derive(Debug)]
pub(crate) struct NodeContext {
    pub(crate) policy: DeliveryPolicy,
    pub(crate) client: reqwest::Client,
    pub(crate) devices: DeviceSettings,
    registration: watch::Sender<u64>,
}

impl NodeContext {
    pub(crate) fn new(policy: DeliveryPolicy, devices: DeviceSettings) -> Self {
        Self {
            policy,
            client: reqwest::Client::new(),
            devices,
            registration: watch::Sender::new(0),
        }
    }

    // Asks for a directory re-registration of the whole tree.
    //
    // Requests issued before the registrar catches up are coalesced.
    pub(crate) fn request_registration(&self) {
        self.registration.send_modify(|generation| {
            *generation = generation.wrapping_add(1);
        });
    }

    pub(crate) fn registration_requests(&self) -> watch::Receiver<u64> {
        self.registration.subscribe()
    }
}

// Type-erased access to the raw resource of a leaf.
trait LeafValue: Send + Sync {
    fn encode(&self, format: ContentFormat, leaf: &Leaf, actuator: bool) -> Result<Representation>;

    fn write(&self, payload: &str) -> Result<()>;

    fn detach(&self);
}

struct RawLeaf<T: ResourceValue> {
    raw: Arc<RawResource<T>>,
    listener: ListenerId,
}

impl<T: ResourceValue> LeafValue for RawLeaf<T> {
    fn encode(&self, format: ContentFormat, leaf: &Leaf, actuator: bool) -> Result<Representation> {
        let value = self.raw.value();
        match format {
            ContentFormat::SenmlJson => {
                let mut record = SenmlRecord::with_value(value.to_senml())
                    .base_name(leaf.base_name.as_str())
                    .time(now_millis());
                if let Some(unit) = leaf.unit {
                    record = record.unit(unit);
                }
                if actuator {
                    record = record.base_version(ACTUATOR_VERSION);
                }
                let body = SenmlPack::new().record(record).to_json()?;
                Ok(Representation::new(format, body))
            }
            ContentFormat::TextPlain => Ok(Representation::new(format, value.to_text())),
            ContentFormat::Json | ContentFormat::LinkFormat => Err(Error::new(
                ErrorKind::UnsupportedMediaType,
                format!("Leaf resources cannot be encoded as {format}"),
            )),
        }
    }

    fn write(&self, payload: &str) -> Result<()> {
        let payload = payload.trim();

        if payload.is_empty() {
            let mut toggleable = true;
            self.raw.update(|current| {
                let toggled = current.toggled();
                toggleable = toggled.is_some();
                toggled
            })?;
            return if toggleable {
                Ok(())
            } else {
                Err(Error::bad_request(format!(
                    "A {} value cannot be toggled",
                    T::type_name()
                )))
            };
        }

        let value = if payload.starts_with('[') {
            SenmlPack::from_json(payload)
                .ok()
                .and_then(|pack| pack.first_value())
                .and_then(|value| T::from_senml(&value))
        } else {
            T::parse_text(payload)
        };

        let value = value.ok_or_else(|| {
            Error::bad_request(format!(
                "`{payload}` is not a valid {} value",
                T::type_name()
            ))
        })?;

        self.raw.set_value(value)
    }

    fn detach(&self) {
        let _ = self.raw.remove_listener(self.listener);
    }
}

struct Leaf {
    value: Box<dyn LeafValue>,
    // `deviceId:resourceName`.
    base_name: String,
    unit: Option<&'static str>,
    simulator: Mutex<Option<PeriodicSimulator>>,
}

enum Role {
    Sensor(Leaf),
    Actuator(Leaf),
    Composite(ContainerKind),
}

#[derive(Debug)]
struct NodeState {
    name: String,
    sequence: u64,
    deleted: bool,
    children: IndexMap<String, ResourceNode>,
}

struct NodeInner {
    id: String,
    path: String,
    attributes: ResourceAttributes,
    role: Role,
    state: Mutex<NodeState>,
    observers: Observers,
    parent: Weak<NodeInner>,
    context: Arc<NodeContext>,
}

// Bridges raw resource changes to the node notifications.
struct NodeListener(Weak<NodeInner>);

impl<T> ResourceDataListener<T> for NodeListener {
    fn on_data_changed(&self, _resource_id: &str, _old: &T, _new: &T) -> Result<()> {
        if let Some(inner) = self.0.upgrade() {
            ResourceNode { inner }.notify_changed();
        }
        Ok(())
    }
}

/// An addressable node of a resource tree.
///
/// A node is either a leaf wrapping a [`RawResource`], or a composite
/// grouping other nodes. Cloning a node returns another handle to the same
/// node.
#[derive(Clone)]
pub struct ResourceNode {
    inner: Arc<NodeInner>,
}

impl std::fmt::Debug for ResourceNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceNode")
            .field("path", &self.inner.path)
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

impl PartialEq for ResourceNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

fn child_path(parent: &str, segment: Option<&str>, id: &str) -> String {
    let relative = match segment {
        Some(segment) => format!("{segment}/{id}"),
        None => id.to_owned(),
    };
    if parent.is_empty() {
        relative
    } else {
        format!("{parent}/{relative}")
    }
}

fn valid_segment(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Returns the attributes of a composite resource.
#[must_use]
pub fn composite_attributes(
    kind: ContainerKind,
    title: impl Into<Cow<'static, str>>,
) -> ResourceAttributes {
    let interface = match kind {
        ContainerKind::Building => Interface::LinkList,
        _ => Interface::Batch,
    };
    ResourceAttributes::new(
        kind.resource_type(),
        interface,
        ContentFormats::init_from_formats([
            ContentFormat::Json,
            ContentFormat::LinkFormat,
            ContentFormat::TextPlain,
        ]),
    )
    .title(title)
    .observable()
}

/// Returns the attributes of the leaf resource of a device.
#[must_use]
pub fn leaf_attributes(kind: DeviceKind) -> ResourceAttributes {
    ResourceAttributes::new(
        kind.resource_type(),
        kind.interface(),
        ContentFormats::init_from_formats([ContentFormat::SenmlJson, ContentFormat::TextPlain]),
    )
    .title(kind.resource_name())
    .observable()
}

impl ResourceNode {
    /// Wraps a [`RawResource`] into a standalone sensor node.
    #[must_use]
    pub fn sensor<T: ResourceValue>(
        name: &str,
        raw: Arc<RawResource<T>>,
        attributes: ResourceAttributes,
    ) -> Self {
        let base_name = format!("{}:{name}", raw.resource_id());
        Self::leaf(
            &Self::standalone_context(),
            None,
            name,
            base_name,
            None,
            attributes,
            raw,
            NodeKind::Sensor,
        )
    }

    /// Wraps a [`RawResource`] into a standalone actuator node.
    #[must_use]
    pub fn actuator<T: ResourceValue>(
        name: &str,
        raw: Arc<RawResource<T>>,
        attributes: ResourceAttributes,
    ) -> Self {
        let base_name = format!("{}:{name}", raw.resource_id());
        Self::leaf(
            &Self::standalone_context(),
            None,
            name,
            base_name,
            None,
            attributes,
            raw,
            NodeKind::Actuator,
        )
    }

    fn standalone_context() -> Arc<NodeContext> {
        Arc::new(NodeContext::new(
            DeliveryPolicy::new(),
            DeviceSettings::new().without_simulation(),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn leaf<T: ResourceValue>(
        context: &Arc<NodeContext>,
        parent: Option<&Self>,
        name: &str,
        base_name: String,
        unit: Option<&'static str>,
        attributes: ResourceAttributes,
        raw: Arc<RawResource<T>>,
        kind: NodeKind,
    ) -> Self {
        let path = parent.map_or_else(
            || name.to_owned(),
            |parent| child_path(&parent.inner.path, None, name),
        );
        let parent = parent.map_or_else(Weak::new, |parent| Arc::downgrade(&parent.inner));

        let inner = Arc::new_cyclic(|weak: &Weak<NodeInner>| {
            let listener = raw.add_listener(Arc::new(NodeListener(weak.clone())));
            let leaf = Leaf {
                value: Box::new(RawLeaf { raw, listener }),
                base_name,
                unit,
                simulator: Mutex::new(None),
            };
            NodeInner {
                id: name.to_owned(),
                path,
                attributes,
                role: match kind {
                    NodeKind::Actuator => Role::Actuator(leaf),
                    _ => Role::Sensor(leaf),
                },
                state: Mutex::new(NodeState {
                    name: name.to_owned(),
                    sequence: 0,
                    deleted: false,
                    children: IndexMap::new(),
                }),
                observers: Observers::new(context.policy, context.client.clone()),
                parent,
                context: Arc::clone(context),
            }
        });

        Self { inner }
    }

    pub(crate) fn composite(
        context: &Arc<NodeContext>,
        parent: Option<&Self>,
        kind: ContainerKind,
        id: &str,
        name: String,
    ) -> Self {
        let (path, parent) = match parent {
            Some(parent) => {
                let segment = match parent.kind() {
                    NodeKind::Composite(parent_kind) => parent_kind.child_segment(),
                    _ => None,
                };
                (
                    child_path(&parent.inner.path, segment, id),
                    Arc::downgrade(&parent.inner),
                )
            }
            None => (String::new(), Weak::new()),
        };

        Self {
            inner: Arc::new(NodeInner {
                id: id.to_owned(),
                path,
                attributes: composite_attributes(kind, name.clone()),
                role: Role::Composite(kind),
                state: Mutex::new(NodeState {
                    name,
                    sequence: 0,
                    deleted: false,
                    children: IndexMap::new(),
                }),
                observers: Observers::new(context.policy, context.client.clone()),
                parent,
                context: Arc::clone(context),
            }),
        }
    }

    // Attaches a child while building a subtree, without notifications.
    pub(crate) fn insert_child(&self, child: Self) {
        let _ = self
            .inner
            .state
            .lock()
            .children
            .insert(child.inner.id.clone(), child);
    }

    pub(crate) fn attach_simulator(&self, simulator: PeriodicSimulator) {
        if let Role::Sensor(leaf) | Role::Actuator(leaf) = &self.inner.role {
            *leaf.simulator.lock() = Some(simulator);
        }
    }

    /// Returns the path segment identifying the node.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Returns the node path, without the leading slash.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> String {
        self.inner.state.lock().name.clone()
    }

    /// Returns the static attributes.
    #[must_use]
    pub fn attributes(&self) -> &ResourceAttributes {
        &self.inner.attributes
    }

    /// Checks whether the node can be observed.
    #[must_use]
    pub fn is_observable(&self) -> bool {
        self.inner.attributes.observable
    }

    /// Returns the node role.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match &self.inner.role {
            Role::Sensor(_) => NodeKind::Sensor,
            Role::Actuator(_) => NodeKind::Actuator,
            Role::Composite(kind) => NodeKind::Composite(*kind),
        }
    }

    /// Returns the children, in insertion order.
    #[must_use]
    pub fn children(&self) -> Vec<Self> {
        self.inner.state.lock().children.values().cloned().collect()
    }

    /// Returns the child with the given identifier.
    #[must_use]
    pub fn child(&self, id: &str) -> Option<Self> {
        self.inner.state.lock().children.get(id).cloned()
    }

    /// Returns the sequence number of the last notification.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.inner.state.lock().sequence
    }

    /// Checks whether the node has been deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.inner.state.lock().deleted
    }

    /// Returns the active observe relations.
    #[must_use]
    pub fn relations(&self) -> Vec<ObserveRelation> {
        self.inner.observers.relations()
    }

    /// Returns the link describing the node.
    #[must_use]
    pub fn link(&self) -> Link {
        Link::new(self.inner.path.as_str(), self.inner.attributes.clone())
    }

    /// Returns the links of the node and of all its descendants, depth first.
    #[must_use]
    pub fn links(&self) -> Vec<Link> {
        let mut links = vec![self.link()];
        for child in self.children() {
            links.extend(child.links());
        }
        links
    }

    /// Encodes the current state in the first mutually supported format.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::UnsupportedMediaType`] when no accepted format is
    ///   supported
    /// - [`ErrorKind::NotFound`] when the node has been deleted
    pub fn handle_read(&self, accept: &Accept) -> Result<Representation> {
        let format = self.negotiate(accept)?;
        let state = self.inner.state.lock();
        if state.deleted {
            return Err(Error::not_found(&self.inner.path));
        }
        self.encode(&state, format)
    }

    /// Writes a payload.
    ///
    /// - On actuators, an empty payload toggles a boolean value, while any
    ///   other payload is parsed as the new value. Observers are notified
    ///   exactly once per accepted write.
    /// - On composites, the payload renames the node.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::MethodNotAllowed`] on sensors
    /// - [`ErrorKind::BadRequest`] on malformed payloads
    /// - [`ErrorKind::RejectedValue`] when the value is refused
    pub fn handle_write(&self, payload: &str) -> Result<Ack> {
        self.ensure_alive()?;

        match &self.inner.role {
            Role::Sensor(_) => Err(Error::new(
                ErrorKind::MethodNotAllowed,
                format!("Sensor `/{}` is read-only", self.inner.path),
            )),
            Role::Actuator(leaf) => {
                leaf.value.write(payload)?;
                Ok(Ack::ok())
            }
            Role::Composite(_) => {
                let name = payload.trim();
                if name.is_empty() {
                    return Err(Error::bad_request("Empty name"));
                }
                self.inner.state.lock().name = name.to_owned();
                info!("Renamed `/{}` to `{name}`", self.inner.path);
                self.notify_changed();
                self.inner.context.request_registration();
                Ok(Ack::ok())
            }
        }
    }

    /// Creates a child resource.
    ///
    /// The building creates floors and floors create areas, from their
    /// identifiers. Areas create devices from a `deviceId:kind` payload.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::MethodNotAllowed`] on devices and leaves
    /// - [`ErrorKind::BadRequest`] on malformed payloads
    /// - [`ErrorKind::Conflict`] when the child already exists
    pub fn handle_create(&self, payload: &str) -> Result<Created> {
        self.create_child(payload)
            .map(|child| Created::new(child.inner.path.as_str()))
    }

    pub(crate) fn create_child(&self, payload: &str) -> Result<Self> {
        self.ensure_alive()?;

        let kind = match &self.inner.role {
            Role::Composite(kind) if !matches!(kind, ContainerKind::Device(_)) => *kind,
            _ => {
                return Err(Error::new(
                    ErrorKind::MethodNotAllowed,
                    format!("`/{}` cannot create children", self.inner.path),
                ));
            }
        };

        let payload = payload.trim();
        let context = &self.inner.context;
        let child = match kind.child_kind() {
            Some(child_kind) => {
                if !valid_segment(payload) {
                    return Err(Error::bad_request(format!(
                        "`{payload}` is not a valid identifier"
                    )));
                }
                let prefix = match child_kind {
                    ContainerKind::Floor => "floor",
                    _ => "area",
                };
                Self::composite(
                    context,
                    Some(self),
                    child_kind,
                    payload,
                    format!("{prefix}{payload}"),
                )
            }
            None => {
                let (device_id, kind) = payload
                    .split_once(':')
                    .and_then(|(id, kind)| Some((id.trim(), DeviceKind::parse(kind)?)))
                    .filter(|(id, _)| valid_segment(id))
                    .ok_or_else(|| {
                        Error::bad_request(format!(
                            "`{payload}` is not a valid `deviceId:kind` pair"
                        ))
                    })?;
                if self.child(device_id).is_some() {
                    return Err(conflict(&self.inner.path, device_id));
                }
                devices::build(context, self, device_id, kind)?
            }
        };

        {
            let mut state = self.inner.state.lock();
            if state.deleted {
                return Err(Error::not_found(&self.inner.path));
            }
            if state.children.contains_key(child.id()) {
                return Err(conflict(&self.inner.path, child.id()));
            }
            let _ = state
                .children
                .insert(child.inner.id.clone(), child.clone());
        }

        info!("Created `/{}`", child.inner.path);
        self.notify_changed();
        context.request_registration();

        Ok(child)
    }

    /// Deletes the node and, first, all its descendants.
    ///
    /// Each deleted node stops its simulation, sends a terminal notification
    /// to its observers, and waits for the in-flight deliveries. The parent
    /// notifies its own observers of the removal.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::BadRequest`] on a non-empty payload
    /// - [`ErrorKind::MethodNotAllowed`] on the tree root
    /// - [`ErrorKind::NotFound`] when the node has already been deleted
    pub async fn handle_delete(&self, payload: &str) -> Result<Ack> {
        if !payload.trim().is_empty() {
            return Err(Error::bad_request("Delete requests carry no payload"));
        }
        if matches!(self.inner.role, Role::Composite(ContainerKind::Building)) {
            return Err(Error::new(
                ErrorKind::MethodNotAllowed,
                "The building cannot be deleted",
            ));
        }
        self.ensure_alive()?;

        self.clone().delete_subtree(true).await;
        Ok(Ack::ok())
    }

    fn delete_subtree(self, detach: bool) -> BoxedTask {
        Box::pin(async move {
            let children: Vec<Self> = {
                let mut state = self.inner.state.lock();
                if state.deleted {
                    return;
                }
                state.deleted = true;
                state.children.values().cloned().collect()
            };

            for child in children {
                child.delete_subtree(false).await;
            }

            if let Role::Sensor(leaf) | Role::Actuator(leaf) = &self.inner.role {
                leaf.value.detach();
                let simulator = leaf.simulator.lock().take();
                if let Some(simulator) = simulator {
                    simulator.stop().await;
                }
            }

            if detach && let Some(parent) = self.inner.parent.upgrade() {
                ResourceNode { inner: parent }.remove_child(&self.inner.id);
            }

            // Earlier notifications, retries included, precede the terminal one.
            self.inner.observers.drain().await;

            {
                let mut state = self.inner.state.lock();
                state.children.clear();
                state.sequence += 1;
                let sequence = state.sequence;
                self.inner
                    .observers
                    .notify(&self.inner.path, sequence, true, |format| {
                        self.encode(&state, format).ok()
                    });
            }

            self.inner.observers.clear();
            self.inner.observers.drain().await;
            debug!("Deleted `/{}`", self.inner.path);
        })
    }

    fn remove_child(&self, id: &str) {
        let removed = self.inner.state.lock().children.shift_remove(id);
        if removed.is_some() {
            info!("Removed `/{}` from `/{}`", id, self.inner.path);
            self.notify_changed();
            self.inner.context.request_registration();
        }
    }

    // Stops simulations and waits for deliveries, without notifications.
    pub(crate) fn stop(self) -> BoxedTask {
        Box::pin(async move {
            for child in self.children() {
                child.stop().await;
            }
            if let Role::Sensor(leaf) | Role::Actuator(leaf) = &self.inner.role {
                let simulator = leaf.simulator.lock().take();
                if let Some(simulator) = simulator {
                    simulator.stop().await;
                }
            }
            self.inner.observers.drain().await;
        })
    }

    /// Starts observing the node.
    ///
    /// The notification encoding is negotiated once, here. A subscription
    /// reusing the token of an active relation replaces it.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::NotObservable`] when the node cannot be observed
    /// - [`ErrorKind::UnsupportedMediaType`] when no accepted format is
    ///   supported
    /// - [`ErrorKind::NotFound`] when the node has been deleted
    pub fn subscribe(
        &self,
        subscriber: Subscriber,
        token: impl Into<String>,
        accept: &Accept,
    ) -> Result<ObserveRelation> {
        if !self.is_observable() {
            return Err(Error::new(
                ErrorKind::NotObservable,
                format!("`/{}` cannot be observed", self.inner.path),
            ));
        }
        let content_format = self.negotiate(accept)?;

        let state = self.inner.state.lock();
        if state.deleted {
            return Err(Error::not_found(&self.inner.path));
        }

        let relation = ObserveRelation {
            subscriber,
            token: token.into(),
            content_format,
            last_sequence_sent: state.sequence,
        };
        debug!(
            "New relation `{}` on `/{}` as {content_format}",
            relation.token, self.inner.path
        );
        self.inner.observers.subscribe(relation.clone());

        Ok(relation)
    }

    /// Stops observing the node.
    ///
    /// Returns `false` when no relation has the given token.
    pub fn unsubscribe(&self, token: &str) -> bool {
        self.inner.observers.unsubscribe(token)
    }

    /// Returns the current state of the node, encoded for the relation with
    /// the given token.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotFound`] when the node has been deleted or no relation
    /// has the given token.
    pub fn observe_snapshot(&self, token: &str) -> Result<Notification> {
        let relation = self
            .relations()
            .into_iter()
            .find(|relation| relation.token == token)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::NotFound,
                    format!("No relation `{token}` on `/{}`", self.inner.path),
                )
            })?;

        let state = self.inner.state.lock();
        if state.deleted {
            return Err(Error::not_found(&self.inner.path));
        }
        let representation = self.encode(&state, relation.content_format)?;
        Ok(Notification::new(
            self.inner.path.as_str(),
            token,
            state.sequence,
            representation,
        ))
    }

    // Notifies every relation of an accepted state change.
    //
    // The sequence is incremented and the snapshot encoded under the node
    // lock, so relations see strictly increasing sequences.
    pub(crate) fn notify_changed(&self) {
        let mut state = self.inner.state.lock();
        if state.deleted {
            return;
        }
        state.sequence += 1;
        let sequence = state.sequence;
        self.inner
            .observers
            .notify(&self.inner.path, sequence, false, |format| {
                match self.encode(&state, format) {
                    Ok(representation) => Some(representation),
                    Err(e) => {
                        warn!("Encoding `/{}` failed: {e}", self.inner.path);
                        None
                    }
                }
            });
    }

    fn negotiate(&self, accept: &Accept) -> Result<ContentFormat> {
        accept
            .negotiate(&self.inner.attributes.content_formats)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::UnsupportedMediaType,
                    format!(
                        "`/{}` supports none of the accepted formats",
                        self.inner.path
                    ),
                )
            })
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_deleted() {
            Err(Error::not_found(&self.inner.path))
        } else {
            Ok(())
        }
    }

    fn encode(&self, state: &NodeState, format: ContentFormat) -> Result<Representation> {
        match &self.inner.role {
            Role::Sensor(leaf) => leaf.value.encode(format, leaf, false),
            Role::Actuator(leaf) => leaf.value.encode(format, leaf, true),
            Role::Composite(kind) => match format {
                ContentFormat::Json => {
                    let document = CompositeDocument {
                        id: self.inner.id.clone(),
                        name: state.name.clone(),
                        kind: *kind,
                        children: state
                            .children
                            .values()
                            .map(|child| ChildSummary {
                                id: child.inner.id.clone(),
                                name: child.name(),
                                resource_type: child
                                    .inner
                                    .attributes
                                    .resource_type
                                    .to_string(),
                            })
                            .collect(),
                    };
                    Ok(Representation::new(format, serde_json::to_string(&document)?))
                }
                ContentFormat::LinkFormat => {
                    let links: Vec<Link> = state.children.values().map(Self::link).collect();
                    Ok(Representation::new(format, render_links(&links)))
                }
                ContentFormat::TextPlain => Ok(Representation::new(format, state.name.clone())),
                ContentFormat::SenmlJson => Err(Error::new(
                    ErrorKind::UnsupportedMediaType,
                    "Composite resources cannot be encoded as SenML",
                )),
            },
        }
    }
}

fn conflict(path: &str, id: &str) -> Error {
    Error::new(
        ErrorKind::Conflict,
        format!("`{id}` already exists in `/{path}`"),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use storey::content::{Accept, ContentFormat};
    use storey::device::DeviceKind;
    use storey::senml::{SenmlPack, SenmlValue};

    use tokio::sync::mpsc;

    use crate::error::ErrorKind;
    use crate::observe::Subscriber;
    use crate::raw::RawResource;
    use crate::simulator::{Sign, WalkStep, WalkValue};

    use super::{NodeKind, ResourceNode, leaf_attributes};

    fn camera() -> (Arc<RawResource<u32>>, ResourceNode) {
        let raw = Arc::new(
            RawResource::new(DeviceKind::Camera.resource_type(), 12)
                .id("camera-1")
                .validator(|count| *count <= 30),
        );
        let node = ResourceNode::sensor(
            "people",
            Arc::clone(&raw),
            leaf_attributes(DeviceKind::Camera),
        );
        (raw, node)
    }

    fn light() -> (Arc<RawResource<bool>>, ResourceNode) {
        let raw = Arc::new(RawResource::new(DeviceKind::Light.resource_type(), false).id("light-1"));
        let node = ResourceNode::actuator(
            "switch",
            Arc::clone(&raw),
            leaf_attributes(DeviceKind::Light),
        );
        (raw, node)
    }

    #[test]
    fn test_read_negotiation() {
        let (_, node) = camera();
        assert_eq!(node.kind(), NodeKind::Sensor);

        let text = node.handle_read(&Accept::only(ContentFormat::TextPlain)).unwrap();
        assert_eq!(text.body, "12");

        let senml = node
            .handle_read(&Accept::Formats(vec![
                ContentFormat::TextPlain,
                ContentFormat::SenmlJson,
            ]))
            .unwrap();
        assert_eq!(senml.content_format, ContentFormat::SenmlJson);
        let pack = SenmlPack::from_json(&senml.body).unwrap();
        assert_eq!(pack.first_value(), Some(SenmlValue::Number(12.)));
        assert_eq!(pack.records()[0].bn.as_deref(), Some("camera-1:people"));
        assert!(pack.records()[0].t.is_some());

        let error = node
            .handle_read(&Accept::only(ContentFormat::LinkFormat))
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnsupportedMediaType);
    }

    #[test]
    fn test_sensor_rejects_writes() {
        let (_, node) = camera();
        let error = node.handle_write("5").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::MethodNotAllowed);
        assert_eq!(node.handle_create("x").unwrap_err().kind(), ErrorKind::MethodNotAllowed);
    }

    #[tokio::test]
    async fn test_camera_walk_notifies_once() {
        let (raw, node) = camera();
        let (tx, mut rx) = mpsc::channel(8);
        let relation = node
            .subscribe(Subscriber::Channel(tx), "camera", &Accept::only(ContentFormat::TextPlain))
            .unwrap();
        assert_eq!(relation.last_sequence_sent, 0);

        let next = WalkStep::bounded(0., 30.).apply(raw.value().to_f64(), 7., Sign::Negative);
        raw.set_value(u32::from_f64(next)).unwrap();

        node.inner.observers.drain().await;
        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.sequence, 1);
        assert_eq!(notification.representation.body, "5");
        assert!(rx.try_recv().is_err());
        assert_eq!(node.sequence(), 1);
    }

    #[tokio::test]
    async fn test_rejected_value_does_not_notify() {
        let (raw, node) = camera();
        let (tx, mut rx) = mpsc::channel(8);
        let _ = node
            .subscribe(Subscriber::Channel(tx), "camera", &Accept::Any)
            .unwrap();

        assert_eq!(raw.set_value(31).unwrap_err().kind(), ErrorKind::RejectedValue);

        node.inner.observers.drain().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(raw.value(), 12);
        assert_eq!(node.sequence(), 0);
    }

    #[tokio::test]
    async fn test_light_toggle_and_reassert() {
        let (raw, node) = light();
        let (tx, mut rx) = mpsc::channel(8);
        let _ = node
            .subscribe(
                Subscriber::Channel(tx),
                "light",
                &Accept::only(ContentFormat::SenmlJson),
            )
            .unwrap();

        // Empty payload toggles.
        let _ = node.handle_write("").unwrap();
        assert!(raw.value());

        // Re-asserting the same value still notifies once.
        let _ = node.handle_write("true").unwrap();
        assert!(raw.value());

        node.inner.observers.drain().await;
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert!(rx.try_recv().is_err());

        let pack = SenmlPack::from_json(&second.representation.body).unwrap();
        let record = &pack.records()[0];
        assert_eq!(record.bn.as_deref(), Some("light-1:switch"));
        assert_eq!(record.bver, Some(0.5));
        assert_eq!(record.vb, Some(true));

        // Structured payloads are accepted as well.
        let _ = node.handle_write(r#"[{"vb":false}]"#).unwrap();
        assert!(!raw.value());

        let error = node.handle_write("maybe").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_subscribe_errors() {
        let raw = Arc::new(RawResource::new("iot.sensor.pir", false));
        let mut attributes = leaf_attributes(DeviceKind::Pir);
        attributes.observable = false;
        let node = ResourceNode::sensor("presence", raw, attributes);

        let (tx, _rx) = mpsc::channel(1);
        let error = node
            .subscribe(Subscriber::Channel(tx.clone()), "t", &Accept::Any)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotObservable);

        let (_, camera) = camera();
        let error = camera
            .subscribe(
                Subscriber::Channel(tx),
                "t",
                &Accept::only(ContentFormat::Json),
            )
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnsupportedMediaType);
        assert!(!camera.unsubscribe("t"));
    }

    #[tokio::test]
    async fn test_observe_snapshot() {
        let (_, node) = camera();
        let (tx, _rx) = mpsc::channel(1);
        let _ = node
            .subscribe(Subscriber::Channel(tx), "t", &Accept::only(ContentFormat::TextPlain))
            .unwrap();

        let snapshot = node.observe_snapshot("t").unwrap();
        assert_eq!(snapshot.path, "people");
        assert_eq!(snapshot.sequence, 0);
        assert_eq!(snapshot.representation.body, "12");

        assert!(node.unsubscribe("t"));
        assert!(!node.unsubscribe("t"));
        assert_eq!(
            node.observe_snapshot("t").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}

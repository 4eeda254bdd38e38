use std::sync::Arc;

use storey::content::ContentFormat;
use storey::directory::DirectoryEntry;
use storey::notification::Notification;
use storey::representation::CompositeDocument;

use indexmap::IndexMap;

use tokio::sync::watch;

use tracing::{debug, warn};

/// An area, as last notified by its floor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaView {
    /// Area identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Area path.
    pub path: String,
}

/// A floor, as last notified by its device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloorView {
    /// Floor identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Floor path.
    pub path: String,
    /// Base `URL` of the device exposing the floor.
    pub base_url: String,
    /// Floor areas, in creation order.
    pub areas: Vec<AreaView>,
}

/// An immutable view of the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    ready: bool,
    floors: IndexMap<String, FloorView>,
    // Last applied sequence, per path.
    sequences: IndexMap<String, u64>,
}

impl Snapshot {
    /// Checks whether the directory has been queried successfully at least
    /// once.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// Returns the floors, in discovery order.
    pub fn floors(&self) -> impl Iterator<Item = &FloorView> {
        self.floors.values()
    }

    /// Returns the floor with the given identifier.
    #[must_use]
    pub fn floor(&self, floor_id: &str) -> Option<&FloorView> {
        self.floors.values().find(|floor| floor.id == floor_id)
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// A locally cached view of the observed floors and their areas.
///
/// The cache has a single writer, the discovery client, and many readers.
/// Every update publishes a new [`Snapshot`], so readers never wait for
/// writers.
#[derive(Debug, Clone)]
pub struct ObservedCache {
    snapshot: Arc<watch::Sender<Arc<Snapshot>>>,
}

impl Default for ObservedCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservedCache {
    /// Creates an empty [`ObservedCache`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshot: Arc::new(watch::Sender::new(Arc::new(Snapshot::default()))),
        }
    }

    /// Returns the current [`Snapshot`].
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// Returns a receiver notified of every published [`Snapshot`].
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot.subscribe()
    }

    /// Returns the floors, in discovery order.
    ///
    /// The result is empty until the first notification arrives. Use
    /// [`Self::is_ready`] to tell an empty building from one not yet
    /// discovered.
    #[must_use]
    pub fn floors(&self) -> Vec<FloorView> {
        self.snapshot().floors().cloned().collect()
    }

    /// Returns the areas of a floor.
    #[must_use]
    pub fn areas(&self, floor_id: &str) -> Vec<AreaView> {
        self.snapshot()
            .floor(floor_id)
            .map(|floor| floor.areas.clone())
            .unwrap_or_default()
    }

    /// Checks whether the directory has been queried successfully at least
    /// once.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.snapshot.borrow().ready
    }

    /// Returns the base `URL` of the device exposing a path.
    #[must_use]
    pub fn base_url(&self, path: &str) -> Option<String> {
        let path = path.trim_matches('/');
        self.snapshot()
            .floors()
            .find(|floor| {
                path == floor.path
                    || path
                        .strip_prefix(floor.path.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .map(|floor| floor.base_url.clone())
    }

    // Inserts the floors found by a lookup, keeping known names and areas.
    pub(crate) fn seed(&self, entries: &[DirectoryEntry]) {
        let _ = self.update(|snapshot| {
            for entry in entries {
                let path = entry.link.path.clone();
                let base_url = entry.base_url();
                let _ = snapshot
                    .floors
                    .entry(path.clone())
                    .and_modify(|floor| floor.base_url.clone_from(&base_url))
                    .or_insert_with(|| FloorView {
                        id: last_segment(&path).to_owned(),
                        name: entry
                            .link
                            .attributes
                            .title
                            .as_deref()
                            .unwrap_or_else(|| last_segment(&path))
                            .to_owned(),
                        path: path.clone(),
                        base_url,
                        areas: Vec::new(),
                    });
            }
            snapshot.ready = true;
            true
        });
    }

    // Forgets the last applied sequence of a path, before a new relation
    // restarts its numbering.
    pub(crate) fn reset_sequence(&self, path: &str) {
        let _ = self.update(|snapshot| snapshot.sequences.shift_remove(path).is_some());
    }

    // Applies a floor notification.
    //
    // Returns `false` for stale, duplicate, or unreadable notifications.
    pub(crate) fn apply(&self, notification: &Notification) -> bool {
        let path = notification.path.as_str();

        let document = if notification.terminal {
            None
        } else if notification.representation.content_format == ContentFormat::Json {
            match serde_json::from_str::<CompositeDocument>(&notification.representation.body) {
                Ok(document) => Some(document),
                Err(e) => {
                    warn!("Notification {} of `/{path}` unreadable: {e}", notification.sequence);
                    return false;
                }
            }
        } else {
            warn!(
                "Notification {} of `/{path}` has unexpected encoding {}",
                notification.sequence, notification.representation.content_format
            );
            return false;
        };

        self.update(|snapshot| {
            if snapshot
                .sequences
                .get(path)
                .is_some_and(|last| notification.sequence <= *last)
            {
                debug!(
                    "Discarding stale notification {} of `/{path}`",
                    notification.sequence
                );
                return false;
            }

            let Some(document) = document else {
                let _ = snapshot.sequences.insert(path.to_owned(), notification.sequence);
                let removed = snapshot.floors.shift_remove(path).is_some();
                debug!("Floor `/{path}` removed: {removed}");
                return true;
            };

            let Some(floor) = snapshot.floors.get_mut(path) else {
                debug!("Notification of untracked floor `/{path}` ignored");
                return false;
            };

            floor.name = document.name;
            floor.areas = document
                .children
                .into_iter()
                .map(|child| AreaView {
                    path: format!("{path}/area/{}", child.id),
                    id: child.id,
                    name: child.name,
                })
                .collect();
            let _ = snapshot.sequences.insert(path.to_owned(), notification.sequence);
            true
        })
    }

    // Drops the floors whose paths are not listed.
    pub(crate) fn retain(&self, paths: &[String]) -> Vec<String> {
        let mut removed = Vec::new();
        let _ = self.update(|snapshot| {
            snapshot.floors.retain(|path, _| {
                let keep = paths.contains(path);
                if !keep {
                    removed.push(path.clone());
                }
                keep
            });
            !removed.is_empty()
        });
        removed
    }

    pub(crate) fn clear(&self) {
        let _ = self.snapshot.send_replace(Arc::new(Snapshot::default()));
    }

    // Publishes a modified copy of the snapshot when `change` returns `true`.
    fn update(&self, change: impl FnOnce(&mut Snapshot) -> bool) -> bool {
        self.snapshot.send_if_modified(|current| {
            let mut next = Snapshot::clone(current);
            let changed = change(&mut next);
            if changed {
                *current = Arc::new(next);
            }
            changed
        })
    }
}

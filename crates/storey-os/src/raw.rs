use std::borrow::Cow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use storey::value::ResourceValue;

use parking_lot::{Mutex, RwLock};

use tracing::{error, warn};

use crate::error::{Error, Result};

/// Identifier of a listener registered on a [`RawResource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A party interested in the value changes of a [`RawResource`].
pub trait ResourceDataListener<T>: Send + Sync {
    /// Called after every accepted mutation, with the resource identifier,
    /// the previous value, and the new one.
    ///
    /// # Errors
    ///
    /// A returned error is logged and does not affect the resource or the
    /// other listeners.
    fn on_data_changed(&self, resource_id: &str, old: &T, new: &T) -> Result<()>;
}

impl<T, F> ResourceDataListener<T> for F
where
    F: Fn(&str, &T, &T) -> Result<()> + Send + Sync,
{
    fn on_data_changed(&self, resource_id: &str, old: &T, new: &T) -> Result<()> {
        self(resource_id, old, new)
    }
}

type Validator<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// A typed resource owning a current value.
///
/// Every accepted mutation is fanned out to the registered listeners, in
/// registration order, before the mutating call returns. Mutations of the
/// same resource are serialized, while different resources never share a
/// lock.
pub struct RawResource<T: ResourceValue> {
    id: String,
    resource_type: Cow<'static, str>,
    value: RwLock<T>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ResourceDataListener<T>>)>>,
    next_listener: AtomicU64,
    validator: Option<Validator<T>>,
    // Held for a whole mutation, fan-out included.
    mutation: Mutex<()>,
}

impl<T: ResourceValue> std::fmt::Debug for RawResource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawResource")
            .field("id", &self.id)
            .field("resource_type", &self.resource_type)
            .field("value", &*self.value.read())
            .field("listeners", &self.listeners.read().len())
            .finish_non_exhaustive()
    }
}

impl<T: ResourceValue> RawResource<T> {
    /// Creates a [`RawResource`] with a random identifier.
    #[must_use]
    pub fn new(resource_type: impl Into<Cow<'static, str>>, initial: T) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            resource_type: resource_type.into(),
            value: RwLock::new(initial),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(0),
            validator: None,
            mutation: Mutex::new(()),
        }
    }

    /// Sets the resource identifier.
    #[must_use]
    #[inline]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets a validity predicate: values failing it are rejected.
    #[must_use]
    #[inline]
    pub fn validator(mut self, validator: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Returns the resource identifier.
    #[must_use]
    pub fn resource_id(&self) -> &str {
        &self.id
    }

    /// Returns the resource type.
    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Returns the last accepted value.
    #[must_use]
    pub fn value(&self) -> T {
        self.value.read().clone()
    }

    /// Replaces the value and notifies every listener.
    ///
    /// Listeners are notified even when the new value equals the old one.
    ///
    /// # Errors
    ///
    /// The value is rejected, and the state left untouched, when the
    /// validator refuses it.
    pub fn set_value(&self, value: T) -> Result<()> {
        self.update(|_| Some(value))
    }

    /// Computes a new value from the current one and stores it, as a single
    /// mutation.
    ///
    /// When `next` returns [`None`], nothing is stored and no listener is
    /// notified.
    ///
    /// # Errors
    ///
    /// The value is rejected, and the state left untouched, when the
    /// validator refuses it.
    pub fn update(&self, next: impl FnOnce(&T) -> Option<T>) -> Result<()> {
        let _mutation = self.mutation.lock();

        let current = self.value();
        let Some(new) = next(&current) else {
            return Ok(());
        };

        if let Some(validator) = &self.validator
            && !validator(&new)
        {
            return Err(Error::rejected(format!(
                "Value {new:?} refused by resource `{}`",
                self.id
            )));
        }

        let old = std::mem::replace(&mut *self.value.write(), new.clone());
        self.fan_out(&old, &new);

        Ok(())
    }

    /// Registers a listener and returns its identifier.
    pub fn add_listener(&self, listener: Arc<dyn ResourceDataListener<T>>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Removes a listener.
    ///
    /// Returns `false` when no listener has the given identifier.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Returns the identifiers of the registered listeners, in registration
    /// order.
    #[must_use]
    pub fn listeners(&self) -> Vec<ListenerId> {
        self.listeners.read().iter().map(|(id, _)| *id).collect()
    }

    fn fan_out(&self, old: &T, new: &T) {
        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| {
                listener.on_data_changed(&self.id, old, new)
            })) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    "Listener {id:?} of resource `{}` failed: {e}",
                    self.id
                ),
                Err(_) => error!("Listener {id:?} of resource `{}` panicked", self.id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::error::{Error, ErrorKind, Result};

    use super::{RawResource, ResourceDataListener};

    type Calls = Arc<Mutex<Vec<(String, u32, u32)>>>;

    fn recorder(tag: &'static str, calls: &Calls) -> Arc<dyn ResourceDataListener<u32>> {
        let calls = Arc::clone(calls);
        Arc::new(move |_: &str, old: &u32, new: &u32| -> Result<()> {
            calls.lock().push((tag.into(), *old, *new));
            Ok(())
        })
    }

    fn camera() -> RawResource<u32> {
        RawResource::new("iot.sensor.camera", 12)
            .id("camera-1")
            .validator(|count| *count <= 30)
    }

    #[test]
    fn test_set_value_notifies_in_order() {
        let calls = Calls::default();
        let camera = camera();
        let _ = camera.add_listener(recorder("first", &calls));
        let _ = camera.add_listener(recorder("second", &calls));

        camera.set_value(5).unwrap();

        assert_eq!(camera.value(), 5);
        assert_eq!(
            *calls.lock(),
            vec![("first".into(), 12, 5), ("second".into(), 12, 5)]
        );
    }

    #[test]
    fn test_rejected_value_keeps_state() {
        let calls = Calls::default();
        let camera = camera();
        let _ = camera.add_listener(recorder("only", &calls));

        let error = camera.set_value(31).unwrap_err();

        assert_eq!(error.kind(), ErrorKind::RejectedValue);
        assert_eq!(camera.value(), 12);
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn test_same_value_still_notifies() {
        let calls = Calls::default();
        let camera = camera();
        let _ = camera.add_listener(recorder("only", &calls));

        camera.set_value(12).unwrap();
        assert_eq!(calls.lock().len(), 1);

        // A skipped update notifies nobody.
        camera.update(|_| None).unwrap();
        assert_eq!(calls.lock().len(), 1);
    }

    #[test]
    fn test_failing_listeners_are_contained() {
        let calls = Calls::default();
        let camera = camera();
        let _ = camera.add_listener(Arc::new(|_: &str, _: &u32, _: &u32| -> Result<()> {
            Err(Error::new(ErrorKind::Internal, "listener failure"))
        }));
        let _ = camera.add_listener(Arc::new(|_: &str, _: &u32, _: &u32| -> Result<()> {
            panic!("listener panic")
        }));
        let _ = camera.add_listener(recorder("last", &calls));

        camera.set_value(7).unwrap();

        assert_eq!(camera.value(), 7);
        assert_eq!(*calls.lock(), vec![("last".into(), 12, 7)]);
    }

    #[test]
    fn test_remove_listener() {
        let calls = Calls::default();
        let camera = camera();
        let first = camera.add_listener(recorder("first", &calls));
        let second = camera.add_listener(recorder("second", &calls));
        assert_eq!(camera.listeners(), vec![first, second]);

        assert!(camera.remove_listener(first));
        assert!(!camera.remove_listener(first));
        assert_eq!(camera.listeners(), vec![second]);

        camera.set_value(1).unwrap();
        assert_eq!(*calls.lock(), vec![("second".into(), 12, 1)]);
    }

    #[test]
    fn test_identifiers() {
        let light = RawResource::new("iot.actuator.light", false);
        assert_eq!(light.resource_type(), "iot.actuator.light");
        assert!(uuid::Uuid::parse_str(light.resource_id()).is_ok());
        assert_eq!(camera().resource_id(), "camera-1");
    }
}

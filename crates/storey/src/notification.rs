use alloc::string::String;

use serde::Serialize;

use crate::content::Accept;
use crate::representation::Representation;

/// A change notification pushed to an observer.
///
/// Sequence numbers are strictly increasing per resource, so an observer
/// discards any notification whose sequence is not greater than the last one
/// it applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Notification {
    /// Path of the changed resource.
    pub path: String,
    /// Token identifying the observe relation.
    pub token: String,
    /// Sequence number.
    pub sequence: u64,
    /// Encoded resource state.
    pub representation: Representation,
    /// Whether the resource has been deleted.
    ///
    /// A terminal notification is the last one of a relation.
    #[serde(default)]
    pub terminal: bool,
}

impl Notification {
    /// Creates a [`Notification`].
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        token: impl Into<String>,
        sequence: u64,
        representation: Representation,
    ) -> Self {
        Self {
            path: path.into(),
            token: token.into(),
            sequence,
            representation,
            terminal: false,
        }
    }

    /// Marks the notification as terminal.
    #[must_use]
    #[inline]
    pub const fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

/// A request to observe a resource.
///
/// Notifications are delivered through `POST {callback}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct SubscribeRequest {
    /// Path of the observed resource.
    pub path: String,
    /// Callback `URL` receiving the notifications.
    pub callback: String,
    /// Token identifying the relation.
    pub token: String,
    /// Encodings accepted for the notification payload.
    #[serde(default)]
    pub accept: Accept,
}

/// A request to stop observing a resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct UnsubscribeRequest {
    /// Path of the observed resource.
    pub path: String,
    /// Token identifying the relation.
    pub token: String,
}

#[cfg(test)]
#[cfg(feature = "deserialize")]
mod tests {
    use serde_json::json;

    use crate::content::{Accept, ContentFormat};
    use crate::representation::Representation;
    use crate::{deserialize, serialize};

    use super::{Notification, SubscribeRequest};

    #[test]
    fn test_notification() {
        let notification = Notification::new(
            "floor/1",
            "token-1",
            3,
            Representation::new(ContentFormat::TextPlain, "floor1"),
        );

        let value = serialize(&notification);
        assert_eq!(value["terminal"], json!(false));
        assert_eq!(
            value["representation"]["content_format"],
            json!("text/plain")
        );
        assert_eq!(deserialize::<Notification>(value), notification);
        assert!(notification.terminal().terminal);
    }

    #[test]
    fn test_subscribe_request_default_accept() {
        let request = deserialize::<SubscribeRequest>(json!({
            "path": "floor/1",
            "callback": "http://127.0.0.1:9000/notify",
            "token": "t",
        }));

        assert_eq!(request.accept, Accept::Any);
    }
}

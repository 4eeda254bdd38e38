use std::sync::Arc;
use std::time::Duration;

use storey::content::ContentFormat;
use storey::notification::Notification;
use storey::representation::Representation;

use indexmap::IndexMap;

use parking_lot::Mutex;

use tokio::sync::mpsc;

use tokio_util::task::TaskTracker;

use tracing::{debug, error, warn};

// Default time bound of a single delivery attempt.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);
// Default number of retries after a failed attempt.
const RETRIES: u32 = 2;
// Default wait before the first retry, doubled at each further retry.
const BACKOFF: Duration = Duration::from_millis(100);

/// Where the notifications of an observe relation are delivered.
#[derive(Debug, Clone)]
pub enum Subscriber {
    /// Notifications are posted as `JSON` to a callback `URL`.
    Http {
        /// Callback `URL`.
        callback: String,
    },
    /// Notifications are sent into an in-process channel.
    Channel(mpsc::Sender<Notification>),
}

impl Subscriber {
    /// Creates a [`Subscriber`] posting notifications to a callback `URL`.
    #[must_use]
    pub fn http(callback: impl Into<String>) -> Self {
        Self::Http {
            callback: callback.into(),
        }
    }
}

/// An observe relation between a resource and a subscriber.
#[derive(Debug, Clone)]
pub struct ObserveRelation {
    /// Notification endpoint.
    pub subscriber: Subscriber,
    /// Token identifying the relation.
    pub token: String,
    /// Encoding negotiated at subscription time.
    pub content_format: ContentFormat,
    /// Sequence of the last successfully delivered notification.
    pub last_sequence_sent: u64,
}

/// Timing and retry budget of notification deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    attempt_timeout: Duration,
    retries: u32,
    backoff: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryPolicy {
    /// Creates a [`DeliveryPolicy`] with a 2 seconds attempt timeout and
    /// 2 retries.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            attempt_timeout: ATTEMPT_TIMEOUT,
            retries: RETRIES,
            backoff: BACKOFF,
        }
    }

    /// Sets the time bound of a single attempt.
    #[must_use]
    #[inline]
    pub const fn attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Sets the number of retries after a failed attempt.
    #[must_use]
    #[inline]
    pub const fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the wait before the first retry.
    #[must_use]
    #[inline]
    pub const fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn backoff_for(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(1 << retry.min(16))
    }
}

#[derive(Debug)]
struct Entry {
    // Distinguishes a relation from a later one reusing its token.
    generation: u64,
    relation: ObserveRelation,
}

#[derive(Debug, Default)]
struct Relations {
    entries: IndexMap<String, Entry>,
    next_generation: u64,
}

/// The observe relations of a resource and their in-flight deliveries.
#[derive(Debug)]
pub(crate) struct Observers {
    relations: Arc<Mutex<Relations>>,
    tracker: TaskTracker,
    policy: DeliveryPolicy,
    client: reqwest::Client,
}

impl Observers {
    pub(crate) fn new(policy: DeliveryPolicy, client: reqwest::Client) -> Self {
        Self {
            relations: Arc::new(Mutex::new(Relations::default())),
            tracker: TaskTracker::new(),
            policy,
            client,
        }
    }

    // Adds a relation, replacing any relation with the same token.
    pub(crate) fn subscribe(&self, relation: ObserveRelation) {
        let mut relations = self.relations.lock();
        let generation = relations.next_generation;
        relations.next_generation += 1;
        if let Some(previous) = relations.entries.insert(
            relation.token.clone(),
            Entry {
                generation,
                relation,
            },
        ) {
            debug!("Relation `{}` replaced", previous.relation.token);
        }
    }

    pub(crate) fn unsubscribe(&self, token: &str) -> bool {
        self.relations.lock().entries.shift_remove(token).is_some()
    }

    pub(crate) fn relations(&self) -> Vec<ObserveRelation> {
        self.relations
            .lock()
            .entries
            .values()
            .map(|entry| entry.relation.clone())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.relations.lock().entries.len()
    }

    pub(crate) fn clear(&self) {
        self.relations.lock().entries.clear();
    }

    // Spawns one delivery task per relation.
    //
    // Representations are encoded once per negotiated format.
    pub(crate) fn notify(
        &self,
        path: &str,
        sequence: u64,
        terminal: bool,
        mut encode: impl FnMut(ContentFormat) -> Option<Representation>,
    ) {
        let targets: Vec<_> = self
            .relations
            .lock()
            .entries
            .values()
            .map(|entry| (entry.generation, entry.relation.clone()))
            .collect();

        if targets.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("Notification {sequence} of `/{path}` dropped: no runtime");
            return;
        };

        let mut encoded: Vec<(ContentFormat, Representation)> = Vec::new();
        for (generation, relation) in targets {
            let representation = match encoded
                .iter()
                .find(|(format, _)| *format == relation.content_format)
            {
                Some((_, representation)) => representation.clone(),
                None => {
                    let Some(representation) = encode(relation.content_format) else {
                        warn!(
                            "Notification {sequence} of `/{path}` cannot be encoded as {}",
                            relation.content_format
                        );
                        continue;
                    };
                    encoded.push((relation.content_format, representation.clone()));
                    representation
                }
            };

            let mut notification =
                Notification::new(path, relation.token.as_str(), sequence, representation);
            notification.terminal = terminal;

            let delivery = Delivery {
                relations: Arc::clone(&self.relations),
                policy: self.policy,
                client: self.client.clone(),
                generation,
                subscriber: relation.subscriber,
                notification,
            };
            let _handle = self.tracker.spawn_on(delivery.run(), &runtime);
        }
    }

    // Waits for every in-flight delivery to complete.
    pub(crate) async fn drain(&self) {
        let _ = self.tracker.close();
        self.tracker.wait().await;
        let _ = self.tracker.reopen();
    }
}

struct Delivery {
    relations: Arc<Mutex<Relations>>,
    policy: DeliveryPolicy,
    client: reqwest::Client,
    generation: u64,
    subscriber: Subscriber,
    notification: Notification,
}

impl Delivery {
    async fn run(self) {
        let attempts = self.policy.retries + 1;
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.policy.backoff_for(attempt - 1)).await;
            }

            match self.attempt().await {
                Ok(()) => {
                    self.delivered();
                    return;
                }
                Err(e) => debug!(
                    "Attempt {} of notification {} for `{}` failed: {e}",
                    attempt + 1,
                    self.notification.sequence,
                    self.notification.token
                ),
            }
        }

        warn!(
            "Evicting relation `{}` of `/{}`: notification {} undelivered after {attempts} attempts",
            self.notification.token, self.notification.path, self.notification.sequence
        );
        self.evict();
    }

    async fn attempt(&self) -> Result<(), String> {
        let timeout = self.policy.attempt_timeout;
        match &self.subscriber {
            Subscriber::Http { callback } => {
                let response = self
                    .client
                    .post(callback)
                    .timeout(timeout)
                    .json(&self.notification)
                    .send()
                    .await
                    .map_err(|e| e.to_string())?;
                response
                    .error_for_status()
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            Subscriber::Channel(sender) => {
                match tokio::time::timeout(timeout, sender.send(self.notification.clone())).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err("channel closed".into()),
                    Err(_) => Err("timed out".into()),
                }
            }
        }
    }

    fn delivered(&self) {
        let mut relations = self.relations.lock();
        if let Some(entry) = relations.entries.get_mut(&self.notification.token)
            && entry.generation == self.generation
        {
            entry.relation.last_sequence_sent = entry
                .relation
                .last_sequence_sent
                .max(self.notification.sequence);
        }
    }

    fn evict(&self) {
        let mut relations = self.relations.lock();
        if relations
            .entries
            .get(&self.notification.token)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            let _ = relations.entries.shift_remove(&self.notification.token);
        }
    }
}

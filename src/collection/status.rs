//! Secondary per-item status feed layered over a live collection.
//!
//! Most consumers never need live status, so the feed is only registered
//! on request. Until it is live, status is polled: one fetch per cached
//! item, where one failing item never aborts the batch.

use super::live::LiveCollection;
use crate::error::{LiveError, Result};
use crate::log::Log;
use crate::transport::{push_handler, PushTransport};
use crate::types::{Key, SubscriptionId, Topic};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};

/// Lifecycle of the status feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusState {
    /// Not registered; status is polled.
    Idle,
    /// Registration in progress.
    Subscribing,
    /// Registered; items are kept current by push.
    Live,
}

/// How status is fetched, decoded and applied for one item type.
#[async_trait]
pub trait StatusSource<T>: Send + Sync {
    /// Fetch the current status of one item.
    async fn fetch_status(&self, item: &T) -> Result<Value>;

    /// Apply a status payload to an item.
    fn apply_status(&self, item: &T, status: Value) -> Result<()>;

    /// Split a pushed status event into its target key and status body.
    /// The default expects `{"content": {"id": .., ..}}`.
    fn status_target(&self, event: Value) -> Result<(Key, Value)> {
        let content = match event {
            Value::Object(mut fields) => fields
                .remove("content")
                .ok_or_else(|| LiveError::decode("status event without content"))?,
            _ => return Err(LiveError::decode("status event is not an object")),
        };
        let key = Key::from_field(&content, "id")?;
        Ok((key, content))
    }
}

/// Outcome of a status refresh.
#[derive(Debug)]
pub struct StatusReport<T> {
    /// Items at the time of the refresh.
    pub items: Vec<Arc<T>>,
    /// Items whose status was fetched and applied.
    pub refreshed: Vec<Key>,
    /// Items whose fetch or apply failed.
    pub failed: Vec<(Key, LiveError)>,
    /// Whether the feed was live. A live or registering feed is never
    /// polled, so `refreshed` and `failed` stay empty.
    pub live: bool,
}

struct Inner<T> {
    collection: LiveCollection<T>,
    topic: Topic,
    transport: Arc<dyn PushTransport>,
    source: Arc<dyn StatusSource<T>>,
    key_of: fn(&T) -> Key,
    state: Mutex<StatusState>,
    subscription: Mutex<Option<SubscriptionId>>,
    log: Arc<dyn Log>,
}

/// Status feed for the items of one collection.
pub struct StatusChannel<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for StatusChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> StatusChannel<T> {
    pub fn new(
        collection: LiveCollection<T>,
        topic: Topic,
        transport: Arc<dyn PushTransport>,
        source: Arc<dyn StatusSource<T>>,
        key_of: fn(&T) -> Key,
    ) -> Self {
        let log = Arc::clone(collection.log());
        Self {
            inner: Arc::new(Inner {
                collection,
                topic,
                transport,
                source,
                key_of,
                state: Mutex::new(StatusState::Idle),
                subscription: Mutex::new(None),
                log,
            }),
        }
    }

    pub fn state(&self) -> StatusState {
        *self.inner.state.lock()
    }

    pub fn is_live(&self) -> bool {
        self.state() == StatusState::Live
    }

    /// Bring status up to date.
    ///
    /// While the feed is live (or being registered) this returns the
    /// current snapshot without fetching. Otherwise, when `subscribe` is
    /// set the feed is registered first (a failure is logged and the feed
    /// stays idle), then every cached item is polled.
    pub async fn refresh_status(&self, subscribe: bool) -> StatusReport<T> {
        let state = self.state();
        if state != StatusState::Idle {
            return StatusReport {
                items: self.inner.collection.items(),
                refreshed: Vec::new(),
                failed: Vec::new(),
                live: state == StatusState::Live,
            };
        }

        if subscribe {
            // Failure already logged; polling below still runs.
            let _ = self.start().await;
        }

        self.poll().await
    }

    /// Explicitly register the live feed.
    ///
    /// Enabling a feed that is already live or being registered is a
    /// misuse: it is logged and rejected without touching the feed.
    pub async fn go_live(&self) -> Result<()> {
        if self.state() != StatusState::Idle {
            let message = format!("Status for {} is already live", self.inner.collection.name());
            self.inner.log.error(self.inner.collection.name(), &message);
            return Err(LiveError::AlreadyEnabled(message));
        }
        self.start().await
    }

    async fn start(&self) -> Result<()> {
        let name = self.inner.collection.name().to_string();
        {
            let mut state = self.inner.state.lock();
            if *state != StatusState::Idle {
                return Ok(());
            }
            *state = StatusState::Subscribing;
        }

        let weak = Arc::downgrade(&self.inner);
        let handler = push_handler(move |event| on_status(weak.clone(), event));

        match self.inner.transport.subscribe(&self.inner.topic, handler).await {
            Ok(id) => {
                let disposed = {
                    let mut state = self.inner.state.lock();
                    if *state == StatusState::Subscribing {
                        *state = StatusState::Live;
                        *self.inner.subscription.lock() = Some(id);
                        false
                    } else {
                        true
                    }
                };
                if disposed {
                    // Disposed while registering.
                    self.drop_registration(id).await;
                    return Ok(());
                }
                self.inner
                    .log
                    .info(&name, &format!("Subscribed to status for {}", name));
                Ok(())
            }
            Err(e) => {
                *self.inner.state.lock() = StatusState::Idle;
                self.inner
                    .log
                    .error(&name, &format!("Error subscribing to status for {}: {}", name, e));
                Err(e)
            }
        }
    }

    /// Drop the feed registration and fall back to polling. A later
    /// `go_live` registers again.
    pub async fn dispose(&self) {
        let id = {
            let mut state = self.inner.state.lock();
            *state = StatusState::Idle;
            self.inner.subscription.lock().take()
        };
        if let Some(id) = id {
            self.drop_registration(id).await;
        }
    }

    async fn drop_registration(&self, id: SubscriptionId) {
        if let Err(e) = self.inner.transport.unsubscribe(id).await {
            self.inner.log.warn(
                self.inner.collection.name(),
                &format!("Unsubscribe failed: {}", e),
            );
        }
    }

    async fn poll(&self) -> StatusReport<T> {
        let name = self.inner.collection.name().to_string();
        let items = self.inner.collection.items();
        let mut refreshed = Vec::with_capacity(items.len());
        let mut failed = Vec::new();

        for item in &items {
            let key = (self.inner.key_of)(item);
            let outcome = match self.inner.source.fetch_status(item).await {
                Ok(status) => self.inner.source.apply_status(item, status),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => {
                    self.inner
                        .log
                        .info(&name, &format!("Refreshed status for {}", key));
                    refreshed.push(key);
                }
                Err(e) => {
                    self.inner
                        .log
                        .error(&name, &format!("Error getting status for {}: {}", key, e));
                    failed.push((key, e));
                }
            }
        }

        StatusReport {
            items,
            refreshed,
            failed,
            live: false,
        }
    }
}

async fn on_status<T: Send + Sync + 'static>(weak: Weak<Inner<T>>, event: Value) {
    let inner = match weak.upgrade() {
        Some(inner) => inner,
        None => return,
    };
    let name = inner.collection.name().to_string();

    let (key, status) = match inner.source.status_target(event) {
        Ok(target) => target,
        Err(e) => {
            inner.log.warn(&name, &format!("Dropped status event: {}", e));
            return;
        }
    };

    match inner.collection.get(key).await {
        Ok(Some(item)) => {
            if let Err(e) = inner.source.apply_status(&item, status) {
                inner
                    .log
                    .error(&name, &format!("Bad status for {}: {}", key, e));
            }
        }
        Ok(None) => inner
            .log
            .error(&name, &format!("Unknown item {} in {}", key, name)),
        Err(e) => inner
            .log
            .error(&name, &format!("Could not resolve {} for status: {}", key, e)),
    }
}

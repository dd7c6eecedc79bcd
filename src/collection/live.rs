//! The live collection primitive.

use super::config::{CollectionConfig, PushChannels};
use super::coordinator::SingleFlight;
use super::source::Source;
use crate::error::{LiveError, Result};
use crate::events::{CollectionEvent, EventBridge};
use crate::identity::Identity;
use crate::log::Log;
use crate::transport::{push_handler, PushHandler};
use crate::types::{Key, SubscriptionId, Topic};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

/// Mutable state, guarded by one lock that is never held across an await.
struct State<T> {
    /// Items in order of first materialization.
    items: IndexMap<Key, Arc<T>>,
    loaded: bool,
    subscribed: bool,
    expandable: bool,
    /// Registrations to drop on dispose.
    registrations: Vec<SubscriptionId>,
    /// Keys deleted while a bulk load was outstanding. The bulk result
    /// predates those deletes and must not resurrect them.
    tombstones: Option<HashSet<Key>>,
}

struct Inner<T> {
    name: String,
    identity: Box<dyn Identity<T>>,
    source: Option<Arc<dyn Source>>,
    channels: Option<PushChannels>,
    log: Arc<dyn Log>,
    state: Mutex<State<T>>,
    load_flight: SingleFlight,
    subscribe_flight: SingleFlight,
    /// Outstanding single-item fetches, one per key.
    fetch_flights: Mutex<HashMap<Key, Arc<SingleFlight>>>,
    events: Arc<EventBridge<CollectionEvent<T>>>,
}

/// Keyed, insertion-ordered mirror of a remote entity set.
///
/// Cheap to clone; clones share the same state.
pub struct LiveCollection<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for LiveCollection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Non-owning handle to a collection, for callbacks registered elsewhere.
pub struct WeakCollection<T> {
    inner: Weak<Inner<T>>,
}

impl<T> Clone for WeakCollection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> WeakCollection<T> {
    pub fn upgrade(&self) -> Option<LiveCollection<T>> {
        self.inner.upgrade().map(|inner| LiveCollection { inner })
    }
}

impl<T: Send + Sync + 'static> LiveCollection<T> {
    /// Create an empty, unloaded, unsubscribed collection.
    ///
    /// `source` may be `None` for collections that only ever grow from
    /// push events; `channels` may be `None` for fetch-only collections.
    pub fn new<I>(
        config: CollectionConfig,
        identity: I,
        source: Option<Arc<dyn Source>>,
        channels: Option<PushChannels>,
    ) -> Self
    where
        I: Identity<T> + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                name: config.name,
                identity: Box::new(identity),
                source,
                channels,
                log: config.log,
                state: Mutex::new(State {
                    items: IndexMap::new(),
                    loaded: false,
                    subscribed: false,
                    expandable: config.expandable,
                    registrations: Vec::new(),
                    tombstones: None,
                }),
                load_flight: SingleFlight::new(),
                subscribe_flight: SingleFlight::new(),
                fetch_flights: Mutex::new(HashMap::new()),
                events: Arc::new(EventBridge::new()),
            }),
        }
    }

    // --- Accessors ---

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn downgrade(&self) -> WeakCollection<T> {
        WeakCollection {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Event surface: `Created`, `Deleted` and `Updated` per item.
    pub fn events(&self) -> &Arc<EventBridge<CollectionEvent<T>>> {
        &self.inner.events
    }

    /// Snapshot of the current items in order.
    pub fn items(&self) -> Vec<Arc<T>> {
        self.inner.state.lock().items.values().cloned().collect()
    }

    /// Snapshot of the current keys in order.
    pub fn keys(&self) -> Vec<Key> {
        self.inner.state.lock().items.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().items.is_empty()
    }

    pub fn contains(&self, key: impl Into<Key>) -> bool {
        self.inner.state.lock().items.contains_key(&key.into())
    }

    /// Cached item, without any fetch.
    pub fn cached(&self, key: impl Into<Key>) -> Option<Arc<T>> {
        self.inner.state.lock().items.get(&key.into()).cloned()
    }

    /// First cached item matching `predicate`, without any fetch.
    pub fn find_cached<P>(&self, mut predicate: P) -> Option<Arc<T>>
    where
        P: FnMut(&T) -> bool,
    {
        self.inner
            .state
            .lock()
            .items
            .values()
            .find(|item| predicate(item))
            .cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.state.lock().loaded
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.state.lock().subscribed
    }

    pub fn is_expandable(&self) -> bool {
        self.inner.state.lock().expandable
    }

    /// Whether a bulk load is outstanding.
    pub fn is_refreshing(&self) -> bool {
        self.inner.load_flight.in_flight()
    }

    pub fn log(&self) -> &Arc<dyn Log> {
        &self.inner.log
    }

    /// Declare that the collection may stay sparse. `get` then resolves
    /// missing keys one at a time instead of bulk-loading first.
    pub fn mark_expandable(&self) {
        self.inner.state.lock().expandable = true;
    }

    // --- Refresh ---

    /// Ensure the collection is loaded (and, if asked, subscribed) and
    /// return its items.
    ///
    /// Push feeds are registered before the bulk fetch so no event falls
    /// into the gap between the two. Concurrent calls share one fetch and
    /// one registration.
    pub async fn refresh(&self, subscribe: bool) -> Result<Vec<Arc<T>>> {
        if subscribe {
            self.subscribe().await?;
        }
        self.ensure_loaded().await?;
        Ok(self.items())
    }

    /// Bulk-load once. A failure leaves the items untouched and is seen
    /// by every caller waiting on the same load.
    pub async fn ensure_loaded(&self) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        self.inner
            .load_flight
            .run(move || async move { LiveCollection { inner }.load().await })
            .await
    }

    async fn load(&self) -> Result<()> {
        let source = {
            let mut state = self.inner.state.lock();
            if state.loaded {
                return Ok(());
            }
            match &self.inner.source {
                Some(source) if source.fetches_all() => {
                    state.tombstones = Some(HashSet::new());
                    Arc::clone(source)
                }
                _ => {
                    // Nothing to bulk-load: the collection grows from push
                    // events and single fetches only.
                    state.loaded = true;
                    return Ok(());
                }
            }
        };

        let fetched = source.fetch_all().await;
        let payloads = match fetched {
            Ok(payloads) => payloads,
            Err(e) => {
                self.inner.state.lock().tombstones = None;
                self.inner
                    .log
                    .error(&self.inner.name, &format!("Bulk fetch failed: {}", e));
                return Err(e);
            }
        };

        let created = match self.apply_bulk(payloads) {
            Ok(created) => created,
            Err(e) => {
                self.inner.state.lock().tombstones = None;
                self.inner
                    .log
                    .error(&self.inner.name, &format!("Bulk result rejected: {}", e));
                return Err(e);
            }
        };

        self.inner.log.info(
            &self.inner.name,
            &format!("Loaded {} items ({} new)", self.len(), created.len()),
        );
        for item in created {
            self.inner.events.emit(CollectionEvent::Created(item));
        }
        Ok(())
    }

    /// Materialize a whole bulk result, then apply it in one step.
    ///
    /// Keys already present were delivered by push events at least as
    /// fresh as this snapshot, so they are left alone.
    fn apply_bulk(&self, payloads: Vec<Value>) -> Result<Vec<Arc<T>>> {
        let identity = &self.inner.identity;
        let mut state = self.inner.state.lock();
        let tombstones = state.tombstones.take().unwrap_or_default();

        let mut staged: IndexMap<Key, Arc<T>> = IndexMap::with_capacity(payloads.len());
        for raw in payloads {
            let key = identity.raw_key(&raw)?;
            if state.items.contains_key(&key) || tombstones.contains(&key) {
                continue;
            }
            let item = identity.materialize(raw)?;
            staged.insert(key, Arc::new(item));
        }

        let created: Vec<Arc<T>> = staged.values().cloned().collect();
        state.items.extend(staged);
        state.loaded = true;
        Ok(created)
    }

    // --- Subscription ---

    /// Register the push feeds once. Later calls are no-ops; a failed
    /// registration is rolled back so a later call can retry.
    pub async fn subscribe(&self) -> Result<()> {
        if self.inner.channels.is_none() || self.is_subscribed() {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        self.inner
            .subscribe_flight
            .run(move || async move { LiveCollection { inner }.register().await })
            .await
    }

    async fn register(&self) -> Result<()> {
        let channels = match &self.inner.channels {
            Some(channels) if !self.is_subscribed() => channels.clone(),
            _ => return Ok(()),
        };

        let weak = Arc::downgrade(&self.inner);
        let mut feeds: Vec<(Topic, PushHandler)> = vec![
            (channels.create.clone(), handler(&weak, Self::on_create)),
            (channels.delete.clone(), handler(&weak, Self::on_delete)),
        ];
        if let Some(update) = &channels.update {
            feeds.push((update.clone(), handler(&weak, Self::on_update)));
        }

        let mut registered = Vec::with_capacity(feeds.len());
        for (topic, push) in feeds {
            match channels.transport.subscribe(&topic, push).await {
                Ok(id) => registered.push(id),
                Err(e) => {
                    self.inner.log.error(
                        &self.inner.name,
                        &format!("Failed to subscribe to {}: {}", topic, e),
                    );
                    for id in registered {
                        if let Err(e) = channels.transport.unsubscribe(id).await {
                            self.inner
                                .log
                                .warn(&self.inner.name, &format!("Rollback failed: {}", e));
                        }
                    }
                    return Err(e);
                }
            }
        }

        let mut state = self.inner.state.lock();
        state.registrations = registered;
        state.subscribed = true;
        drop(state);

        self.inner
            .log
            .info(&self.inner.name, "Subscribed to push feeds");
        Ok(())
    }

    /// Drop push registrations. Items stay cached; a later
    /// `refresh(true)` registers again.
    pub async fn dispose(&self) {
        let registrations = {
            let mut state = self.inner.state.lock();
            state.subscribed = false;
            std::mem::take(&mut state.registrations)
        };
        if let Some(channels) = &self.inner.channels {
            for id in registrations {
                if let Err(e) = channels.transport.unsubscribe(id).await {
                    self.inner
                        .log
                        .warn(&self.inner.name, &format!("Unsubscribe failed: {}", e));
                }
            }
        }
    }

    // --- Lookup ---

    /// Cached item, or resolve it.
    ///
    /// Non-expandable collections bulk-load first. If the key is still
    /// missing and the source supports single fetches, the item is
    /// fetched, inserted (emitting `Created`) and returned. Concurrent
    /// lookups of the same key share one fetch.
    pub async fn get(&self, key: impl Into<Key>) -> Result<Option<Arc<T>>> {
        let key = key.into();
        if let Some(item) = self.cached(key) {
            return Ok(Some(item));
        }

        if !self.is_expandable() {
            self.ensure_loaded().await?;
            if let Some(item) = self.cached(key) {
                return Ok(Some(item));
            }
        }

        let source = match &self.inner.source {
            Some(source) if source.fetches_single() => Arc::clone(source),
            _ => return Ok(None),
        };

        let flight = {
            let mut flights = self.inner.fetch_flights.lock();
            Arc::clone(flights.entry(key).or_default())
        };
        let collection = self.clone();
        let outcome = flight
            .run(move || async move {
                if collection.cached(key).is_some() {
                    return Ok(());
                }
                let raw = source.fetch_one(key).await?;
                collection.insert_fetched(key, raw).map(|_| ())
            })
            .await;

        {
            let mut flights = self.inner.fetch_flights.lock();
            if flights.get(&key).map_or(false, |f| !f.in_flight()) {
                flights.remove(&key);
            }
        }

        outcome?;
        Ok(self.cached(key))
    }

    fn insert_fetched(&self, key: Key, raw: Value) -> Result<Arc<T>> {
        let identity = &self.inner.identity;
        let actual = identity.raw_key(&raw)?;
        if actual != key {
            return Err(LiveError::decode(format!(
                "fetched {} but received {}",
                key, actual
            )));
        }

        let item = {
            let mut state = self.inner.state.lock();
            // A racing push or fetch may have landed while we waited.
            if let Some(existing) = state.items.get(&key) {
                return Ok(Arc::clone(existing));
            }
            let item = Arc::new(identity.materialize(raw)?);
            state.items.insert(key, Arc::clone(&item));
            item
        };

        self.inner.events.emit(CollectionEvent::Created(Arc::clone(&item)));
        Ok(item)
    }

    // --- Push rules ---

    /// Apply a create notification.
    ///
    /// A new key is appended and announced with `Created`. A key that is
    /// already present keeps its position and has its payload replaced,
    /// announced with `Updated`.
    pub fn apply_create(&self, raw: Value) -> Result<CollectionEvent<T>> {
        let identity = &self.inner.identity;
        let key = identity.raw_key(&raw)?;

        let event = {
            let mut state = self.inner.state.lock();
            if let Some(tombstones) = state.tombstones.as_mut() {
                tombstones.remove(&key);
            }
            match state.items.get(&key).cloned() {
                Some(previous) => {
                    let item = Arc::new(identity.merge(&previous, raw)?);
                    state.items.insert(key, Arc::clone(&item));
                    CollectionEvent::Updated { item, previous }
                }
                None => {
                    let item = Arc::new(identity.materialize(raw)?);
                    state.items.insert(key, Arc::clone(&item));
                    CollectionEvent::Created(item)
                }
            }
        };

        self.inner.events.emit(event.clone());
        Ok(event)
    }

    /// Apply a delete notification. Unknown keys are ignored.
    pub fn apply_delete(&self, raw: Value) -> Result<Option<Arc<T>>> {
        let key = self.inner.identity.raw_key(&raw)?;
        self.remove(key)
    }

    /// Remove an item by key, announcing it with `Deleted`.
    pub fn remove(&self, key: impl Into<Key>) -> Result<Option<Arc<T>>> {
        let key = key.into();
        let removed = {
            let mut state = self.inner.state.lock();
            if let Some(tombstones) = state.tombstones.as_mut() {
                tombstones.insert(key);
            }
            state.items.shift_remove(&key)
        };

        match &removed {
            Some(item) => self
                .inner
                .events
                .emit(CollectionEvent::Deleted(Arc::clone(item))),
            None => self
                .inner
                .log
                .info(&self.inner.name, &format!("Delete for unknown {} ignored", key)),
        }
        Ok(removed)
    }

    /// Apply an update notification. Unknown keys are treated as creates.
    pub fn apply_update(&self, raw: Value) -> Result<CollectionEvent<T>> {
        self.apply_create(raw)
    }

    fn on_create(&self, raw: Value) {
        if let Err(e) = self.apply_create(raw) {
            self.inner
                .log
                .warn(&self.inner.name, &format!("Dropped create event: {}", e));
        }
    }

    fn on_delete(&self, raw: Value) {
        if let Err(e) = self.apply_delete(raw) {
            self.inner
                .log
                .warn(&self.inner.name, &format!("Dropped delete event: {}", e));
        }
    }

    fn on_update(&self, raw: Value) {
        if let Err(e) = self.apply_update(raw) {
            self.inner
                .log
                .warn(&self.inner.name, &format!("Dropped update event: {}", e));
        }
    }
}

/// Push handler holding the collection weakly, so a registration left
/// behind in the transport does not keep the collection alive.
fn handler<T>(weak: &Weak<Inner<T>>, apply: fn(&LiveCollection<T>, Value)) -> PushHandler
where
    T: Send + Sync + 'static,
{
    let weak = weak.clone();
    push_handler(move |raw| {
        if let Some(inner) = weak.upgrade() {
            apply(&LiveCollection { inner }, raw);
        }
        futures::future::ready(())
    })
}

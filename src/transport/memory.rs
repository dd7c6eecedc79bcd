//! In-memory transports (intended for tests and demos).
//!
//! [`MemoryApi`] answers from a route table and counts calls;
//! [`MemoryBus`] records registrations and dispatches published payloads
//! to matching handlers in order.

use super::api::{Api, Method};
use super::push::{PushHandler, PushTransport};
use crate::error::{LiveError, Result};
use crate::types::{Key, SubscriptionId, Topic};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Large enough that a released gate never runs dry.
const OPEN_PERMITS: usize = 1 << 20;

#[derive(Clone)]
enum Reply {
    Ok(Value),
    Fail(String),
}

/// Holds calls to a route until released.
#[derive(Clone)]
pub struct Gate {
    semaphore: Arc<Semaphore>,
}

impl Gate {
    fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(0)),
        }
    }

    /// Let every held and future call through.
    pub fn release(&self) {
        self.semaphore.add_permits(OPEN_PERMITS);
    }

    async fn pass(&self) -> Result<()> {
        self.semaphore
            .acquire()
            .await
            .map(drop)
            .map_err(|e| LiveError::transport(e.to_string()))
    }
}

/// A recorded API call.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub method: Method,
    pub route: String,
    pub body: Option<Value>,
}

/// Route-table API.
#[derive(Default)]
pub struct MemoryApi {
    routes: Mutex<HashMap<(Method, String), Reply>>,
    calls: Mutex<Vec<Call>>,
    gates: Mutex<HashMap<String, Gate>>,
}

impl MemoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method route` with `body`.
    pub fn respond(&self, method: Method, route: impl Into<String>, body: Value) {
        self.routes.lock().insert((method, route.into()), Reply::Ok(body));
    }

    /// Fail `method route` with a transport error.
    pub fn fail(&self, method: Method, route: impl Into<String>, message: impl Into<String>) {
        self.routes
            .lock()
            .insert((method, route.into()), Reply::Fail(message.into()));
    }

    /// Hold calls to `route` (any method) until the gate is released.
    /// Calls are counted when they arrive, not when they complete.
    pub fn pause(&self, route: impl Into<String>) -> Gate {
        let gate = Gate::new();
        self.gates.lock().insert(route.into(), gate.clone());
        gate
    }

    /// Every call so far, oldest first.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Number of calls made to `route` with any method.
    pub fn calls_to(&self, route: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.route == route).count()
    }
}

#[async_trait]
impl Api for MemoryApi {
    async fn fetch(&self, method: Method, route: &str, body: Option<Value>) -> Result<Value> {
        self.calls.lock().push(Call {
            method,
            route: route.to_string(),
            body,
        });

        let gate = self.gates.lock().get(route).cloned();
        if let Some(gate) = gate {
            gate.pass().await?;
        }

        let reply = self.routes.lock().get(&(method, route.to_string())).cloned();
        match reply {
            Some(Reply::Ok(value)) => Ok(value),
            Some(Reply::Fail(message)) => Err(LiveError::Transport(message)),
            None => Err(LiveError::transport(format!("no route for {} {}", method, route))),
        }
    }
}

struct Registration {
    id: SubscriptionId,
    topic: Topic,
    handler: PushHandler,
}

/// In-process push feed.
pub struct MemoryBus {
    registrations: Mutex<Vec<Registration>>,
    history: Mutex<Vec<Topic>>,
    failing: Mutex<HashSet<String>>,
    next_id: AtomicU64,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            registrations: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Make future subscriptions to `event` fail.
    pub fn fail_subscribe(&self, event: impl Into<String>) {
        self.failing.lock().insert(event.into());
    }

    /// Number of subscribe calls ever made for `event` (any key).
    pub fn subscribe_calls(&self, event: &str) -> usize {
        self.history.lock().iter().filter(|t| t.event == event).count()
    }

    /// Number of live registrations for one topic.
    pub fn subscriber_count(&self, event: &str, key: impl Into<Key>) -> usize {
        let topic = Topic::new(event, key);
        self.registrations
            .lock()
            .iter()
            .filter(|r| r.topic == topic)
            .count()
    }

    /// Deliver `payload` to every handler registered for the topic, one
    /// after another. Returns the number of handlers invoked.
    pub async fn publish(&self, event: &str, key: impl Into<Key>, payload: Value) -> usize {
        let topic = Topic::new(event, key);
        let handlers: Vec<PushHandler> = self
            .registrations
            .lock()
            .iter()
            .filter(|r| r.topic == topic)
            .map(|r| Arc::clone(&r.handler))
            .collect();

        for handler in &handlers {
            handler(payload.clone()).await;
        }
        handlers.len()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushTransport for MemoryBus {
    async fn subscribe(&self, topic: &Topic, handler: PushHandler) -> Result<SubscriptionId> {
        self.history.lock().push(topic.clone());

        if self.failing.lock().contains(&topic.event) {
            return Err(LiveError::Subscription(format!("rejected {}", topic)));
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.registrations.lock().push(Registration {
            id,
            topic: topic.clone(),
            handler,
        });
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.registrations.lock().retain(|r| r.id != id);
        Ok(())
    }
}

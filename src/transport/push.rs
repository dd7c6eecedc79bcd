//! Push feed collaborator.

use crate::error::Result;
use crate::types::{SubscriptionId, Topic};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Callback invoked for each payload delivered on a topic.
///
/// Transports await each handler before delivering the next payload of
/// the same feed, so per-key ordering is preserved.
pub type PushHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`PushHandler`].
pub fn push_handler<F, Fut>(f: F) -> PushHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |payload| f(payload).boxed())
}

/// Registers handlers for named, keyed push feeds.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Register `handler` for `topic`. Resolves once the remote side has
    /// acknowledged the registration.
    async fn subscribe(&self, topic: &Topic, handler: PushHandler) -> Result<SubscriptionId>;

    /// Drop a registration.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}

//! Bulk and single-item fetch paths.

use crate::error::{LiveError, Result};
use crate::transport::{Api, Method};
use crate::types::Key;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Where a collection gets its authoritative state from.
#[async_trait]
pub trait Source: Send + Sync {
    /// Fetch the full current set.
    async fn fetch_all(&self) -> Result<Vec<Value>>;

    /// Fetch one item by key.
    async fn fetch_one(&self, key: Key) -> Result<Value> {
        Err(LiveError::Unsupported(format!("single fetch of {}", key)))
    }

    /// Whether `fetch_all` is available. Sources without it are only
    /// useful to expandable collections.
    fn fetches_all(&self) -> bool {
        true
    }

    /// Whether `fetch_one` is available.
    fn fetches_single(&self) -> bool {
        false
    }
}

/// Source backed by two API routes: a list route and an optional
/// per-item prefix (`{prefix}/{key}`).
pub struct ApiSource {
    api: Arc<dyn Api>,
    list_route: String,
    item_prefix: Option<String>,
}

impl ApiSource {
    pub fn new(api: Arc<dyn Api>, list_route: impl Into<String>) -> Self {
        Self {
            api,
            list_route: list_route.into(),
            item_prefix: None,
        }
    }

    /// Enable single fetches at `{prefix}/{key}`.
    pub fn with_item_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.item_prefix = Some(prefix.into());
        self
    }
}

/// Interpret a list response as a sequence of payloads.
pub(crate) fn into_payloads(body: Value, route: &str) -> Result<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(LiveError::decode(format!(
            "expected a list from {}, got {}",
            route,
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl Source for ApiSource {
    async fn fetch_all(&self) -> Result<Vec<Value>> {
        let body = self.api.fetch(Method::Get, &self.list_route, None).await?;
        into_payloads(body, &self.list_route)
    }

    async fn fetch_one(&self, key: Key) -> Result<Value> {
        match &self.item_prefix {
            Some(prefix) => {
                let route = format!("{}/{}", prefix, key);
                self.api.fetch(Method::Get, &route, None).await
            }
            None => Err(LiveError::Unsupported(format!(
                "single fetch of {} from {}",
                key, self.list_route
            ))),
        }
    }

    fn fetches_single(&self) -> bool {
        self.item_prefix.is_some()
    }
}

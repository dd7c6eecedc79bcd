//! Collection configuration.

use crate::log::{default_log, Log};
use crate::transport::PushTransport;
use crate::types::Topic;
use std::fmt;
use std::sync::Arc;

/// Collection configuration.
#[derive(Clone)]
pub struct CollectionConfig {
    /// Name used in log lines.
    pub name: String,

    /// Whether the collection may stay sparse and resolve missing items
    /// one at a time instead of bulk-loading first.
    pub expandable: bool,

    /// Logging capability.
    pub log: Arc<dyn Log>,
}

impl CollectionConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            name: "collection".to_string(),
            expandable: false,
            log: default_log(),
        }
    }
}

impl fmt::Debug for CollectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionConfig")
            .field("name", &self.name)
            .field("expandable", &self.expandable)
            .finish_non_exhaustive()
    }
}

/// Push feeds feeding one collection.
#[derive(Clone)]
pub struct PushChannels {
    pub transport: Arc<dyn PushTransport>,
    pub create: Topic,
    pub delete: Topic,
    pub update: Option<Topic>,
}

impl PushChannels {
    pub fn new(transport: Arc<dyn PushTransport>, create: Topic, delete: Topic) -> Self {
        Self {
            transport,
            create,
            delete,
            update: None,
        }
    }

    /// Also listen for in-place updates.
    pub fn with_update(mut self, update: Topic) -> Self {
        self.update = Some(update);
        self
    }
}

impl fmt::Debug for PushChannels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushChannels")
            .field("create", &self.create)
            .field("delete", &self.delete)
            .field("update", &self.update)
            .finish_non_exhaustive()
    }
}

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use live_mirror::{
    ApiSource, Client, ClientConfig, CollectionConfig, FieldIdentity, Key, LiveCollection,
    MemoryApi, MemoryBus, PushChannels, RecordingLog, Source, Topic,
};
use serde::Deserialize;
use std::sync::Arc;

pub const THINGS: &str = "things";
pub const OWNER: u64 = 1;

/// In-memory transports plus a log that records everything.
pub struct Harness {
    pub api: Arc<MemoryApi>,
    pub bus: Arc<MemoryBus>,
    pub log: Arc<RecordingLog>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            api: Arc::new(MemoryApi::new()),
            bus: Arc::new(MemoryBus::new()),
            log: Arc::new(RecordingLog::new()),
        }
    }

    /// A client for `user_id` that never attaches groups in the background.
    pub fn client(&self, user_id: u64) -> Client {
        Client::new(
            self.api.clone(),
            self.bus.clone(),
            ClientConfig {
                user_id,
                attach_groups: false,
                log: self.log.clone(),
                ..Default::default()
            },
        )
    }

    /// A plain collection over `GET things` with `thing-create` and
    /// `thing-delete` feeds keyed by [`OWNER`].
    pub fn things(&self) -> LiveCollection<Thing> {
        self.things_with(ApiSource::new(self.api.clone(), THINGS), false)
    }

    /// Same feeds, but sparse: missing keys resolve via `GET things/{id}`.
    pub fn sparse_things(&self) -> LiveCollection<Thing> {
        self.things_with(
            ApiSource::new(self.api.clone(), THINGS).with_item_prefix(THINGS),
            true,
        )
    }

    fn things_with(&self, source: ApiSource, expandable: bool) -> LiveCollection<Thing> {
        let source: Arc<dyn Source> = Arc::new(source);
        LiveCollection::new(
            CollectionConfig {
                name: THINGS.to_string(),
                expandable,
                log: self.log.clone(),
            },
            FieldIdentity::new("id", |thing: &Thing| Key(thing.id)),
            Some(source),
            Some(PushChannels::new(
                self.bus.clone(),
                Topic::new("thing-create", OWNER),
                Topic::new("thing-delete", OWNER),
            )),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Thing {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

pub fn names(collection: &LiveCollection<Thing>) -> Vec<String> {
    collection
        .items()
        .iter()
        .map(|thing| thing.name.clone())
        .collect()
}

/// Yield to the runtime until `condition` holds.
pub async fn until<F: Fn() -> bool>(condition: F) {
    while !condition() {
        tokio::task::yield_now().await;
    }
}

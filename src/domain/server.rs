//! Servers of a group and their live status.

use super::Client;
use crate::collection::{
    into_payloads, CollectionConfig, LiveCollection, PushChannels, Source, StatusChannel,
    StatusReport, StatusSource,
};
use crate::error::Result;
use crate::events::{CollectionEvent, EventBridge};
use crate::identity::Identity;
use crate::transport::{Api, Method};
use crate::types::{Key, Topic};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::Deref;
use std::sync::Arc;

/// Static description of a server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Last known runtime status of a server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    #[serde(default)]
    pub is_online: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Change notifications for one server.
#[derive(Clone, Debug)]
pub enum ServerEvent {
    Status(ServerStatus),
    Updated { info: ServerInfo, previous: ServerInfo },
}

/// State that survives re-issuing a server with new info.
struct ServerShared {
    status: Mutex<Option<ServerStatus>>,
    events: Arc<EventBridge<ServerEvent>>,
}

/// A server belonging to a group.
pub struct Server {
    pub group_id: Key,
    pub info: ServerInfo,
    shared: Arc<ServerShared>,
}

impl Server {
    fn new(group_id: Key, info: ServerInfo) -> Self {
        Self {
            group_id,
            info,
            shared: Arc::new(ServerShared {
                status: Mutex::new(None),
                events: Arc::new(EventBridge::new()),
            }),
        }
    }

    pub fn id(&self) -> Key {
        Key(self.info.id)
    }

    pub fn status(&self) -> Option<ServerStatus> {
        self.shared.status.lock().clone()
    }

    pub fn is_online(&self) -> bool {
        self.shared
            .status
            .lock()
            .as_ref()
            .map_or(false, |status| status.is_online)
    }

    pub fn events(&self) -> &Arc<EventBridge<ServerEvent>> {
        &self.shared.events
    }

    /// Record a new status and announce it.
    pub fn apply_status(&self, status: Value) -> Result<()> {
        let status: ServerStatus = serde_json::from_value(status)?;
        *self.shared.status.lock() = Some(status.clone());
        self.shared.events.emit(ServerEvent::Status(status));
        Ok(())
    }

    /// Announce that this server replaced `previous` info.
    pub fn on_update(&self, previous: &ServerInfo) {
        self.shared.events.emit(ServerEvent::Updated {
            info: self.info.clone(),
            previous: previous.clone(),
        });
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("group_id", &self.group_id)
            .field("info", &self.info)
            .field("status", &self.status())
            .finish()
    }
}

struct ServerIdentity {
    group_id: Key,
}

impl Identity<Server> for ServerIdentity {
    fn raw_key(&self, raw: &Value) -> Result<Key> {
        Key::from_field(raw, "id")
    }

    fn item_key(&self, item: &Server) -> Key {
        item.id()
    }

    fn materialize(&self, raw: Value) -> Result<Server> {
        Ok(Server::new(self.group_id, serde_json::from_value(raw)?))
    }

    fn merge(&self, current: &Arc<Server>, raw: Value) -> Result<Server> {
        Ok(Server {
            group_id: self.group_id,
            info: serde_json::from_value(raw)?,
            shared: Arc::clone(&current.shared),
        })
    }
}

/// Servers come embedded in the group payload; when they are not, the
/// group itself is fetched to get them.
struct GroupServerSource {
    api: Arc<dyn Api>,
    group_id: Key,
    embedded: Mutex<Option<Vec<Value>>>,
}

#[async_trait]
impl Source for GroupServerSource {
    async fn fetch_all(&self) -> Result<Vec<Value>> {
        let embedded = self.embedded.lock().take();
        if let Some(servers) = embedded {
            return Ok(servers);
        }
        let route = format!("groups/{}", self.group_id);
        let mut group = self.api.fetch(Method::Get, &route, None).await?;
        let servers = group.get_mut("servers").map(Value::take).unwrap_or(Value::Null);
        into_payloads(servers, &route)
    }
}

struct ServerStatusSource {
    api: Arc<dyn Api>,
}

#[async_trait]
impl StatusSource<Server> for ServerStatusSource {
    async fn fetch_status(&self, server: &Server) -> Result<Value> {
        self.api
            .fetch(Method::Get, &format!("servers/{}", server.id()), None)
            .await
    }

    fn apply_status(&self, server: &Server, status: Value) -> Result<()> {
        server.apply_status(status)
    }
}

/// A group's live server list with an on-demand status feed.
pub struct ServerList {
    collection: LiveCollection<Server>,
    status: StatusChannel<Server>,
}

impl ServerList {
    pub(crate) fn new(
        client: &Client,
        group_id: Key,
        group_name: &str,
        embedded: Option<Vec<Value>>,
    ) -> Self {
        let source: Arc<dyn Source> = Arc::new(GroupServerSource {
            api: Arc::clone(&client.api),
            group_id,
            embedded: Mutex::new(embedded),
        });
        let channels = PushChannels::new(
            Arc::clone(&client.push),
            Topic::new("group-server-create", group_id),
            Topic::new("group-server-delete", group_id),
        )
        .with_update(Topic::new("group-server-update", group_id));

        let collection = LiveCollection::new(
            CollectionConfig {
                name: format!("{} servers", group_name),
                expandable: false,
                log: Arc::clone(client.log()),
            },
            ServerIdentity { group_id },
            Some(source),
            Some(channels),
        );

        // Updated servers learn what they replaced.
        collection.events().listen(|event| {
            if let CollectionEvent::Updated { item, previous } = event {
                item.on_update(&previous.info);
            }
        });

        let status = StatusChannel::new(
            collection.clone(),
            Topic::new("group-server-status", group_id),
            Arc::clone(&client.push),
            Arc::new(ServerStatusSource {
                api: Arc::clone(&client.api),
            }),
            Server::id,
        );

        Self { collection, status }
    }

    pub fn collection(&self) -> &LiveCollection<Server> {
        &self.collection
    }

    pub fn status_channel(&self) -> &StatusChannel<Server> {
        &self.status
    }

    /// Poll (or, with `subscribe`, go live on) status for every server.
    pub async fn refresh_status(&self, subscribe: bool) -> StatusReport<Server> {
        self.status.refresh_status(subscribe).await
    }

    /// Drop the list feeds and the status feed.
    pub async fn dispose(&self) {
        self.collection.dispose().await;
        self.status.dispose().await;
    }
}

impl Deref for ServerList {
    type Target = LiveCollection<Server>;

    fn deref(&self) -> &Self::Target {
        &self.collection
    }
}

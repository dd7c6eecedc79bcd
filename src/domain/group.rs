//! A group and the collections it owns.

use super::member::{GroupMember, MemberIdentity, MemberKind, MemberList};
use super::server::{Server, ServerEvent, ServerList};
use super::Client;
use crate::collection::WeakCollection;
use crate::error::{LiveError, Result};
use crate::events::{CollectionEvent, EventBridge};
use crate::identity::Identity;
use crate::transport::{push_handler, Method};
use crate::types::{Key, SubscriptionId, Topic};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const COMPONENT: &str = "group";

/// Descriptive payload of a group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    /// Servers, when the backend embeds them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servers: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Changes of a group and of every collection it owns.
#[derive(Clone, Debug)]
pub enum GroupEvent {
    MemberCreate(Arc<GroupMember>),
    MemberDelete(Arc<GroupMember>),
    InviteCreate(Arc<GroupMember>),
    InviteDelete(Arc<GroupMember>),
    RequestCreate(Arc<GroupMember>),
    RequestDelete(Arc<GroupMember>),
    BanCreate(Arc<GroupMember>),
    BanDelete(Arc<GroupMember>),
    ServerCreate(Arc<Server>),
    ServerDelete(Arc<Server>),
    Update(Arc<Group>),
}

impl GroupEvent {
    fn for_member(kind: MemberKind, event: &CollectionEvent<GroupMember>) -> Option<Self> {
        let event = match (kind, event) {
            (MemberKind::Member, CollectionEvent::Created(m)) => GroupEvent::MemberCreate(m.clone()),
            (MemberKind::Member, CollectionEvent::Deleted(m)) => GroupEvent::MemberDelete(m.clone()),
            (MemberKind::Invite, CollectionEvent::Created(m)) => GroupEvent::InviteCreate(m.clone()),
            (MemberKind::Invite, CollectionEvent::Deleted(m)) => GroupEvent::InviteDelete(m.clone()),
            (MemberKind::Request, CollectionEvent::Created(m)) => GroupEvent::RequestCreate(m.clone()),
            (MemberKind::Request, CollectionEvent::Deleted(m)) => GroupEvent::RequestDelete(m.clone()),
            (MemberKind::Ban, CollectionEvent::Created(m)) => GroupEvent::BanCreate(m.clone()),
            (MemberKind::Ban, CollectionEvent::Deleted(m)) => GroupEvent::BanDelete(m.clone()),
            (_, CollectionEvent::Updated { .. }) => return None,
        };
        Some(event)
    }
}

/// Everything a group owns; shared by every re-issue of the group.
struct GroupShared {
    client: Client,
    members: MemberList,
    invites: MemberList,
    requests: MemberList,
    bans: MemberList,
    servers: ServerList,
    events: Arc<EventBridge<GroupEvent>>,
    update_subscription: Mutex<Option<SubscriptionId>>,
    watching_online: AtomicBool,
}

/// A group the account belongs to.
///
/// Updates to the group's info re-issue the value; the re-issued group
/// shares its child collections and event surface with the previous one.
pub struct Group {
    pub info: GroupInfo,
    /// The account's own membership, when known.
    pub member: Option<Arc<GroupMember>>,
    shared: Arc<GroupShared>,
}

impl Group {
    /// Build a group and its (empty, unloaded) child collections.
    pub fn new(client: Client, info: GroupInfo, member: Option<Value>) -> Result<Self> {
        let id = Key(info.id);
        let member = match member {
            Some(raw) => {
                let identity = MemberIdentity {
                    group_id: id,
                    kind: MemberKind::Member,
                };
                Some(Arc::new(identity.materialize(raw)?))
            }
            None => None,
        };

        let list = |kind| MemberList::new(&client, id, &info.name, kind);
        let members = list(MemberKind::Member);
        let invites = list(MemberKind::Invite);
        let requests = list(MemberKind::Request);
        let bans = list(MemberKind::Ban);
        let servers = ServerList::new(&client, id, &info.name, info.servers.clone());

        let events = Arc::new(EventBridge::new());
        for list in [&members, &invites, &requests, &bans] {
            let kind = list.kind();
            list.events()
                .forward(&events, move |event| GroupEvent::for_member(kind, event));
        }
        servers.events().forward(&events, |event| match event {
            CollectionEvent::Created(server) => Some(GroupEvent::ServerCreate(server.clone())),
            CollectionEvent::Deleted(server) => Some(GroupEvent::ServerDelete(server.clone())),
            CollectionEvent::Updated { .. } => None,
        });

        client
            .log()
            .info(COMPONENT, &format!("Joined {} - {}", id, info.name));

        Ok(Self {
            info,
            member,
            shared: Arc::new(GroupShared {
                client,
                members,
                invites,
                requests,
                bans,
                servers,
                events,
                update_subscription: Mutex::new(None),
                watching_online: AtomicBool::new(false),
            }),
        })
    }

    /// Same group, new info. Child collections and listeners carry over.
    pub(crate) fn with_info(&self, info: GroupInfo, member: Option<Arc<GroupMember>>) -> Self {
        Self {
            info,
            member: member.or_else(|| self.member.clone()),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn id(&self) -> Key {
        Key(self.info.id)
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn events(&self) -> &Arc<EventBridge<GroupEvent>> {
        &self.shared.events
    }

    pub fn members(&self) -> &MemberList {
        &self.shared.members
    }

    pub fn invites(&self) -> &MemberList {
        &self.shared.invites
    }

    pub fn requests(&self) -> &MemberList {
        &self.shared.requests
    }

    pub fn bans(&self) -> &MemberList {
        &self.shared.bans
    }

    pub fn servers(&self) -> &ServerList {
        &self.shared.servers
    }

    /// Whether two handles refer to the same group instance.
    pub fn same_group(&self, other: &Group) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Route `group-update` events for this group into `groups`, the
    /// collection that owns it. Registers once.
    pub async fn subscribe_updates(&self, groups: WeakCollection<Group>) -> Result<()> {
        if self.shared.update_subscription.lock().is_some() {
            return Ok(());
        }

        let name = self.info.name.clone();
        let log = Arc::clone(self.shared.client.log());
        let handler = push_handler(move |raw| {
            if let Some(groups) = groups.upgrade() {
                if let Err(e) = groups.apply_update(raw) {
                    log.warn(COMPONENT, &format!("Dropped update for {}: {}", name, e));
                }
            }
            futures::future::ready(())
        });

        let topic = Topic::new("group-update", self.id());
        let id = self.shared.client.push.subscribe(&topic, handler).await?;

        let kept = {
            let mut slot = self.shared.update_subscription.lock();
            *slot.get_or_insert(id) == id
        };
        if kept {
            return Ok(());
        }
        // Lost a race with another registration; keep only one.
        self.shared.client.push.unsubscribe(id).await
    }

    /// Make the group live: route its updates and load and subscribe its
    /// server list.
    pub async fn attach(&self, groups: WeakCollection<Group>) -> Result<()> {
        self.subscribe_updates(groups).await?;
        self.servers().refresh(true).await?;
        Ok(())
    }

    /// Leave the group.
    pub async fn leave(&self) -> Result<Value> {
        let route = format!("groups/{}/members", self.id());
        self.shared.client.api.fetch(Method::Delete, &route, None).await
    }

    /// Invite a user.
    pub async fn invite(&self, user_id: u64) -> Result<Value> {
        let route = format!("groups/{}/invites/{}", self.id(), user_id);
        self.shared.client.api.fetch(Method::Post, &route, None).await
    }

    /// Patch the group's info.
    pub async fn edit_info(&self, edit: Value) -> Result<Value> {
        let route = format!("groups/{}", self.id());
        self.shared
            .client
            .api
            .fetch(Method::Patch, &route, Some(edit))
            .await
    }

    /// Call `on_online` whenever a server of this group comes online,
    /// including servers created later.
    ///
    /// Can be enabled once per group; a second call is logged and
    /// rejected.
    pub async fn watch_online_servers<F>(&self, on_online: F) -> Result<()>
    where
        F: Fn(Arc<Server>) + Send + Sync + 'static,
    {
        let log = self.shared.client.log();
        if self.shared.watching_online.swap(true, Ordering::SeqCst) {
            let message = format!("Online watch for {} already enabled", self.info.name);
            log.error(COMPONENT, &message);
            return Err(LiveError::AlreadyEnabled(message));
        }
        log.info(
            COMPONENT,
            &format!("Watching online servers of {}", self.info.name),
        );

        let servers = self.servers();
        if let Err(e) = servers.refresh(true).await {
            self.shared.watching_online.store(false, Ordering::SeqCst);
            return Err(e);
        }
        servers.refresh_status(true).await;

        let watcher = Arc::new(OnlineWatcher {
            servers: servers.collection().downgrade(),
            online: Mutex::new(HashSet::new()),
            on_online: Box::new(on_online),
        });

        let on_create = Arc::clone(&watcher);
        servers.events().listen(move |event| match event {
            CollectionEvent::Created(server) => on_create.watch(server),
            CollectionEvent::Deleted(server) => on_create.forget(server.id()),
            CollectionEvent::Updated { .. } => {}
        });
        for server in servers.items() {
            watcher.watch(&server);
        }
        Ok(())
    }

    /// Drop every push registration this group holds.
    pub async fn dispose(&self) {
        let shared = &self.shared;
        shared
            .client
            .log()
            .info(COMPONENT, &format!("Left {} - {}", self.id(), self.info.name));

        let update = shared.update_subscription.lock().take();
        if let Some(id) = update {
            if let Err(e) = shared.client.push.unsubscribe(id).await {
                shared
                    .client
                    .log()
                    .warn(COMPONENT, &format!("Unsubscribe failed: {}", e));
            }
        }
        for list in [&shared.members, &shared.invites, &shared.requests, &shared.bans] {
            list.dispose().await;
        }
        shared.servers.dispose().await;
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("info", &self.info)
            .field("member", &self.member)
            .finish_non_exhaustive()
    }
}

/// Reports online transitions of a group's servers.
struct OnlineWatcher {
    servers: WeakCollection<Server>,
    online: Mutex<HashSet<Key>>,
    on_online: Box<dyn Fn(Arc<Server>) + Send + Sync>,
}

impl OnlineWatcher {
    fn watch(self: &Arc<Self>, server: &Arc<Server>) {
        let key = server.id();
        let watcher = Arc::downgrade(self);
        server.events().listen(move |event| {
            if let (ServerEvent::Status(status), Some(watcher)) = (event, watcher.upgrade()) {
                watcher.on_status(key, status.is_online);
            }
        });
        self.on_status(key, server.is_online());
    }

    fn forget(&self, key: Key) {
        self.online.lock().remove(&key);
    }

    fn on_status(&self, key: Key, is_online: bool) {
        let became_online = {
            let mut online = self.online.lock();
            if is_online {
                online.insert(key)
            } else {
                online.remove(&key);
                false
            }
        };
        if !became_online {
            return;
        }
        let server = self.servers.upgrade().and_then(|servers| servers.cached(key));
        if let Some(server) = server {
            (self.on_online)(server);
        }
    }
}

/// Group payloads arrive either wrapped with the account's membership
/// (`{"group": {..}, "member": {..}}`) or flat (`{"id": .., ..}`).
#[derive(Deserialize)]
#[serde(untagged)]
enum GroupPayload {
    Joined {
        group: GroupInfo,
        #[serde(default)]
        member: Option<Value>,
    },
    Flat(GroupInfo),
}

impl GroupPayload {
    fn key(raw: &Value) -> Result<Key> {
        match raw.get("group") {
            Some(group) => Key::from_field(group, "id"),
            None => Key::from_field(raw, "id"),
        }
    }

    fn parse(raw: Value) -> Result<(GroupInfo, Option<Value>)> {
        Ok(match serde_json::from_value::<GroupPayload>(raw)? {
            GroupPayload::Joined { group, member } => (group, member),
            GroupPayload::Flat(info) => (info, None),
        })
    }
}

pub(crate) struct GroupIdentity {
    pub(crate) client: Client,
}

impl Identity<Group> for GroupIdentity {
    fn raw_key(&self, raw: &Value) -> Result<Key> {
        GroupPayload::key(raw)
    }

    fn item_key(&self, item: &Group) -> Key {
        item.id()
    }

    fn materialize(&self, raw: Value) -> Result<Group> {
        let (info, member) = GroupPayload::parse(raw)?;
        Group::new(self.client.clone(), info, member)
    }

    fn merge(&self, current: &Arc<Group>, raw: Value) -> Result<Group> {
        let (info, member) = GroupPayload::parse(raw)?;
        let member = match member {
            Some(raw) => {
                let identity = MemberIdentity {
                    group_id: current.id(),
                    kind: MemberKind::Member,
                };
                Some(Arc::new(identity.materialize(raw)?))
            }
            None => None,
        };
        Ok(current.with_info(info, member))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ClientConfig;
    use crate::transport::{MemoryApi, MemoryBus};
    use serde_json::json;

    fn client() -> Client {
        Client::new(
            Arc::new(MemoryApi::new()),
            Arc::new(MemoryBus::new()),
            ClientConfig::default(),
        )
    }

    #[test]
    fn test_identity_handles_both_payload_shapes() {
        let identity = GroupIdentity { client: client() };
        let wrapped = json!({"group": {"id": 4, "name": "four"}, "member": {"user_id": 9, "username": "me"}});
        let flat = json!({"id": 5, "name": "five"});

        assert_eq!(identity.raw_key(&wrapped).unwrap(), Key(4));
        assert_eq!(identity.raw_key(&flat).unwrap(), Key(5));

        let group = identity.materialize(wrapped).unwrap();
        assert_eq!(identity.item_key(&group), Key(4));
        assert_eq!(group.member.as_ref().unwrap().username(), "me");

        let group = identity.materialize(flat).unwrap();
        assert_eq!(identity.item_key(&group), Key(5));
        assert!(group.member.is_none());
    }

    #[test]
    fn test_merge_shares_children_and_keeps_member() {
        let identity = GroupIdentity { client: client() };
        let group = Arc::new(
            identity
                .materialize(json!({"group": {"id": 1, "name": "old"}, "member": {"user_id": 2}}))
                .unwrap(),
        );

        let merged = identity.merge(&group, json!({"id": 1, "name": "new"})).unwrap();
        assert_eq!(merged.name(), "new");
        assert_eq!(group.name(), "old");
        assert!(merged.same_group(&group));
        assert_eq!(merged.member.as_ref().unwrap().user_id(), Key(2));
    }

    #[test]
    fn test_member_events_are_renamed() {
        let identity = GroupIdentity { client: client() };
        let group = identity.materialize(json!({"id": 1, "name": "g"})).unwrap();
        let handle = group.events().channel(8);

        group
            .bans()
            .apply_create(json!({"user_id": 3, "username": "troll"}))
            .unwrap();
        group.members().apply_delete(json!({"user_id": 3})).unwrap();

        let events = handle.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], GroupEvent::BanCreate(m) if m.username() == "troll"));
    }
}

//! The account's groups, pending invites and join requests.

use super::group::{Group, GroupEvent, GroupIdentity, GroupInfo};
use super::server::Server;
use super::Client;
use crate::collection::{
    into_payloads, ApiSource, CollectionConfig, LiveCollection, PushChannels, Source,
};
use crate::error::Result;
use crate::events::{CollectionEvent, EventBridge};
use crate::identity::FieldIdentity;
use crate::transport::Method;
use crate::types::{Key, ListenerId, Topic};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const COMPONENT: &str = "group-manager";

/// Changes to the set of groups the account belongs to.
#[derive(Clone, Debug)]
pub enum ManagerEvent {
    Create(Arc<Group>),
    Delete(Arc<Group>),
    Update(Arc<Group>),
}

/// An invite for the account to join a group.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct GroupInvite {
    pub info: GroupInfo,
}

impl GroupInvite {
    pub fn key(&self) -> Key {
        Key(self.info.id)
    }
}

/// A pending request by the account to join a group.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct GroupRequest {
    pub info: GroupInfo,
}

/// Accepts invites, once per invite.
struct InviteAcceptor {
    client: Client,
    /// Invites accepted or being accepted. Released when an accept fails
    /// or the invite is deleted.
    claimed: Mutex<HashSet<Key>>,
    /// Batches still loading. Invites announced meanwhile are left to the
    /// batch, which accepts everything present once its load finishes.
    loading: AtomicUsize,
    /// Accept invites announced outside a batch.
    following: AtomicBool,
}

impl InviteAcceptor {
    fn on_event(self: &Arc<Self>, event: &CollectionEvent<GroupInvite>) {
        match event {
            CollectionEvent::Created(invite) => {
                if self.loading.load(Ordering::SeqCst) > 0 || !self.following.load(Ordering::SeqCst)
                {
                    return;
                }
                let acceptor = Arc::clone(self);
                let invite = Arc::clone(invite);
                self.client.spawn(COMPONENT, "invite accept", async move {
                    acceptor.accept(&invite).await;
                });
            }
            CollectionEvent::Deleted(invite) => {
                self.claimed.lock().remove(&invite.key());
            }
            CollectionEvent::Updated { .. } => {}
        }
    }

    /// Accept `invite` unless it is already claimed. True if this call
    /// accepted it.
    async fn accept(&self, invite: &GroupInvite) -> bool {
        let key = invite.key();
        if !self.claimed.lock().insert(key) {
            return false;
        }
        match accept(&self.client, invite).await {
            Ok(_) => true,
            Err(e) => {
                self.claimed.lock().remove(&key);
                self.client.log().error(
                    COMPONENT,
                    &format!("Could not accept invite to {}: {}", invite.info.name, e),
                );
                false
            }
        }
    }
}

/// Joined groups: bulk list plus a single fetch that combines the group
/// with the account's own membership.
struct JoinedGroupsSource {
    client: Client,
}

#[async_trait]
impl Source for JoinedGroupsSource {
    async fn fetch_all(&self) -> Result<Vec<Value>> {
        let route = format!("groups/joined?limit={}", self.client.config.page_limit);
        let body = self.client.api.fetch(Method::Get, &route, None).await?;
        into_payloads(body, &route)
    }

    async fn fetch_one(&self, key: Key) -> Result<Value> {
        let api = &self.client.api;
        let group_route = format!("groups/{}", key);
        let member_route = format!("groups/{}/members/{}", key, self.client.config.user_id);
        let (group, member) = futures::try_join!(
            api.fetch(Method::Get, &group_route, None),
            api.fetch(Method::Get, &member_route, None),
        )?;
        Ok(json!({ "group": group, "member": member }))
    }

    fn fetches_single(&self) -> bool {
        true
    }
}

/// Root of the collection tree for one account.
pub struct GroupManager {
    client: Client,
    groups: LiveCollection<Group>,
    invites: LiveCollection<GroupInvite>,
    requests: LiveCollection<GroupRequest>,
    events: Arc<EventBridge<ManagerEvent>>,
    acceptor: Arc<InviteAcceptor>,
    invite_listener: Mutex<Option<ListenerId>>,
}

impl GroupManager {
    pub fn new(client: Client) -> Self {
        let user = Key(client.config.user_id);
        let limit = client.config.page_limit;
        let config = |name: &str| CollectionConfig {
            name: name.to_string(),
            expandable: false,
            log: Arc::clone(client.log()),
        };
        let channels = |stem: &str| {
            PushChannels::new(
                Arc::clone(&client.push),
                Topic::new(format!("me-{}-create", stem), user),
                Topic::new(format!("me-{}-delete", stem), user),
            )
        };

        let joined: Arc<dyn Source> = Arc::new(JoinedGroupsSource {
            client: client.clone(),
        });
        let groups = LiveCollection::new(
            config("groups"),
            GroupIdentity {
                client: client.clone(),
            },
            Some(joined),
            Some(channels("group")),
        );
        groups.mark_expandable();

        let invite_source: Arc<dyn Source> = Arc::new(ApiSource::new(
            Arc::clone(&client.api),
            format!("groups/invites?limit={}", limit),
        ));
        let invites = LiveCollection::new(
            config("invites"),
            FieldIdentity::new("id", GroupInvite::key),
            Some(invite_source),
            Some(channels("group-invite")),
        );

        let request_source: Arc<dyn Source> = Arc::new(ApiSource::new(
            Arc::clone(&client.api),
            format!("groups/requests?limit={}", limit),
        ));
        let requests = LiveCollection::new(
            config("requests"),
            FieldIdentity::new("id", |request: &GroupRequest| Key(request.info.id)),
            Some(request_source),
            Some(channels("group-request")),
        );

        let events = Arc::new(EventBridge::new());
        Self::wire_groups(&client, &groups, &events);

        let acceptor = Arc::new(InviteAcceptor {
            client: client.clone(),
            claimed: Mutex::new(HashSet::new()),
            loading: AtomicUsize::new(0),
            following: AtomicBool::new(false),
        });

        Self {
            client,
            groups,
            invites,
            requests,
            events,
            acceptor,
            invite_listener: Mutex::new(None),
        }
    }

    fn wire_groups(
        client: &Client,
        groups: &LiveCollection<Group>,
        events: &Arc<EventBridge<ManagerEvent>>,
    ) {
        let client = client.clone();
        let weak_groups = groups.downgrade();
        let weak_events = Arc::downgrade(events);

        groups.events().listen(move |event| {
            let events = match weak_events.upgrade() {
                Some(events) => events,
                None => return,
            };
            match event {
                CollectionEvent::Created(group) => {
                    if client.config.attach_groups {
                        let group = Arc::clone(group);
                        let groups = weak_groups.clone();
                        let log = Arc::clone(client.log());
                        client.spawn(COMPONENT, "group attach", async move {
                            if let Err(e) = group.attach(groups).await {
                                log.error(
                                    COMPONENT,
                                    &format!("Could not attach {}: {}", group.name(), e),
                                );
                            }
                        });
                    }
                    events.emit(ManagerEvent::Create(Arc::clone(group)));
                }
                CollectionEvent::Deleted(group) => {
                    let disposed = Arc::clone(group);
                    client.spawn(COMPONENT, "group dispose", async move {
                        disposed.dispose().await;
                    });
                    events.emit(ManagerEvent::Delete(Arc::clone(group)));
                }
                CollectionEvent::Updated { item, .. } => {
                    item.events().emit(GroupEvent::Update(Arc::clone(item)));
                    events.emit(ManagerEvent::Update(Arc::clone(item)));
                }
            }
        });
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn events(&self) -> &Arc<EventBridge<ManagerEvent>> {
        &self.events
    }

    pub fn groups(&self) -> &LiveCollection<Group> {
        &self.groups
    }

    pub fn invites(&self) -> &LiveCollection<GroupInvite> {
        &self.invites
    }

    pub fn requests(&self) -> &LiveCollection<GroupRequest> {
        &self.requests
    }

    /// Load joined groups (and, with `subscribe`, follow joins and leaves).
    pub async fn refresh(&self, subscribe: bool) -> Result<Vec<Arc<Group>>> {
        self.groups.refresh(subscribe).await
    }

    /// A joined group, fetched on demand when not cached yet.
    pub async fn get(&self, id: impl Into<Key>) -> Result<Option<Arc<Group>>> {
        self.groups.get(id).await
    }

    /// Route `group-update` events of a group into the group collection
    /// and load its servers. Done automatically for created groups when
    /// `attach_groups` is set and a runtime is available.
    pub async fn attach(&self, group: &Group) -> Result<()> {
        group.attach(self.groups.downgrade()).await
    }

    /// Accept one invite.
    pub async fn accept_invite(&self, invite: &GroupInvite) -> Result<Value> {
        accept(&self.client, invite).await
    }

    /// Accept every pending invite. With `subscribe`, invites that arrive
    /// later are accepted as they come in. Returns how many were accepted
    /// now; invites accepted earlier are skipped, and individual failures
    /// are logged and skipped.
    pub async fn accept_all_invites(&self, subscribe: bool) -> Result<usize> {
        self.listen_for_invites();

        let acceptor = &self.acceptor;
        let loaded = self.invites.refresh(subscribe).await;
        if subscribe && loaded.is_ok() {
            acceptor.following.store(true, Ordering::SeqCst);
        }
        acceptor.loading.fetch_sub(1, Ordering::SeqCst);

        if let Err(e) = loaded {
            self.client
                .log()
                .error(COMPONENT, &format!("Could not load invites: {}", e));
            self.stop_listening_for_invites();
            return Err(e);
        }

        let mut accepted = 0;
        for invite in self.invites.items() {
            if acceptor.accept(&invite).await {
                accepted += 1;
            }
        }
        self.stop_listening_for_invites();

        self.client
            .log()
            .info(COMPONENT, &format!("Accepted {} group invites", accepted));
        Ok(accepted)
    }

    /// Attach the invite listener and open a batch.
    fn listen_for_invites(&self) {
        let mut listener = self.invite_listener.lock();
        self.acceptor.loading.fetch_add(1, Ordering::SeqCst);
        if listener.is_none() {
            let acceptor = Arc::clone(&self.acceptor);
            *listener = Some(self.invites.events().listen(move |event| acceptor.on_event(event)));
        }
    }

    /// Detach the invite listener unless invites are being followed or
    /// another batch is still loading.
    fn stop_listening_for_invites(&self) {
        let mut listener = self.invite_listener.lock();
        if self.acceptor.following.load(Ordering::SeqCst)
            || self.acceptor.loading.load(Ordering::SeqCst) > 0
        {
            return;
        }
        if let Some(id) = listener.take() {
            self.invites.events().unlisten(id);
        }
    }

    /// Report online servers of every group, including groups joined
    /// later. Groups that already have a watch are skipped.
    pub async fn watch_online_servers<F>(&self, on_online: F) -> Result<()>
    where
        F: Fn(Arc<Server>) + Send + Sync + 'static,
    {
        self.client
            .log()
            .info(COMPONENT, "Watching online servers of all groups");
        let on_online: Arc<dyn Fn(Arc<Server>) + Send + Sync> = Arc::new(on_online);

        let callback = Arc::clone(&on_online);
        let client = self.client.clone();
        self.groups.events().listen(move |event| {
            if let CollectionEvent::Created(group) = event {
                let group = Arc::clone(group);
                let callback = Arc::clone(&callback);
                let log = Arc::clone(client.log());
                client.spawn(COMPONENT, "online watch", async move {
                    if let Err(e) = group.watch_online_servers(move |s| callback(s)).await {
                        log.warn(COMPONENT, &format!("No online watch for {}: {}", group.name(), e));
                    }
                });
            }
        });

        for group in self.groups.items() {
            let callback = Arc::clone(&on_online);
            if let Err(e) = group.watch_online_servers(move |s| callback(s)).await {
                self.client.log().warn(
                    COMPONENT,
                    &format!("No online watch for {}: {}", group.name(), e),
                );
            }
        }
        Ok(())
    }
}

async fn accept(client: &Client, invite: &GroupInvite) -> Result<Value> {
    let route = format!("groups/invites/{}", invite.info.id);
    client.api.fetch(Method::Post, &route, None).await
}

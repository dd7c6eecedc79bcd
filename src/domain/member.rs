//! Group members, invites, requests and bans.

use super::Client;
use crate::collection::{ApiSource, CollectionConfig, LiveCollection, PushChannels, Source};
use crate::error::Result;
use crate::identity::Identity;
use crate::types::{Key, Topic};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::Deref;
use std::sync::Arc;

/// Which list of a group an entry belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Member,
    Invite,
    Request,
    Ban,
}

impl MemberKind {
    /// Route segment under `groups/{id}/`.
    pub fn route(self) -> &'static str {
        match self {
            MemberKind::Member => "members",
            MemberKind::Invite => "invites",
            MemberKind::Request => "requests",
            MemberKind::Ban => "bans",
        }
    }

    /// Event stem, as in `group-{stem}-create`.
    pub fn stem(self) -> &'static str {
        match self {
            MemberKind::Member => "member",
            MemberKind::Invite => "invite",
            MemberKind::Request => "request",
            MemberKind::Ban => "ban",
        }
    }

    /// Only full members can be fetched one at a time and updated in place.
    fn is_member(self) -> bool {
        self == MemberKind::Member
    }
}

/// Payload of a member-like entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub user_id: u64,
    #[serde(default)]
    pub username: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An entry of one of a group's member-like lists.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupMember {
    pub group_id: Key,
    pub kind: MemberKind,
    pub info: MemberInfo,
}

impl GroupMember {
    pub fn user_id(&self) -> Key {
        Key(self.info.user_id)
    }

    pub fn username(&self) -> &str {
        &self.info.username
    }
}

pub(crate) struct MemberIdentity {
    pub(crate) group_id: Key,
    pub(crate) kind: MemberKind,
}

impl Identity<GroupMember> for MemberIdentity {
    fn raw_key(&self, raw: &Value) -> Result<Key> {
        Key::from_field(raw, "user_id")
    }

    fn item_key(&self, item: &GroupMember) -> Key {
        item.user_id()
    }

    fn materialize(&self, raw: Value) -> Result<GroupMember> {
        Ok(GroupMember {
            group_id: self.group_id,
            kind: self.kind,
            info: serde_json::from_value(raw)?,
        })
    }
}

/// How to look a member up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemberLookup {
    Id(Key),
    /// Case-insensitive username, matched against cached entries only.
    Name(String),
}

impl From<u64> for MemberLookup {
    fn from(id: u64) -> Self {
        MemberLookup::Id(Key(id))
    }
}

impl From<Key> for MemberLookup {
    fn from(key: Key) -> Self {
        MemberLookup::Id(key)
    }
}

impl From<&str> for MemberLookup {
    /// Numeric text is an id; anything else is a username.
    fn from(text: &str) -> Self {
        match text.trim().parse::<u64>() {
            Ok(id) => MemberLookup::Id(Key(id)),
            Err(_) => MemberLookup::Name(text.to_string()),
        }
    }
}

/// A live list of member-like entries keyed by user id.
pub struct MemberList {
    kind: MemberKind,
    collection: LiveCollection<GroupMember>,
}

impl MemberList {
    pub(crate) fn new(client: &Client, group_id: Key, group_name: &str, kind: MemberKind) -> Self {
        let route = format!("groups/{}/{}", group_id, kind.route());
        let mut source = ApiSource::new(
            Arc::clone(&client.api),
            format!("{}?limit={}", route, client.config.page_limit),
        );
        if kind.is_member() {
            source = source.with_item_prefix(route);
        }

        let topic = |action: &str| Topic::new(format!("group-{}-{}", kind.stem(), action), group_id);
        let mut channels = PushChannels::new(
            Arc::clone(&client.push),
            topic("create"),
            topic("delete"),
        );
        if kind.is_member() {
            channels = channels.with_update(topic("update"));
        }

        let source: Arc<dyn Source> = Arc::new(source);
        let collection = LiveCollection::new(
            CollectionConfig {
                name: format!("{} {}", group_name, kind.stem()),
                expandable: false,
                log: Arc::clone(client.log()),
            },
            MemberIdentity { group_id, kind },
            Some(source),
            Some(channels),
        );

        Self { kind, collection }
    }

    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    pub fn collection(&self) -> &LiveCollection<GroupMember> {
        &self.collection
    }

    /// Look up an entry by id (fetching if needed) or by username.
    pub async fn find(&self, lookup: impl Into<MemberLookup>) -> Result<Option<Arc<GroupMember>>> {
        match lookup.into() {
            MemberLookup::Id(key) => self.collection.get(key).await,
            MemberLookup::Name(name) => {
                let name = name.to_lowercase();
                Ok(self
                    .collection
                    .find_cached(|member| member.info.username.to_lowercase() == name))
            }
        }
    }
}

impl Deref for MemberList {
    type Target = LiveCollection<GroupMember>;

    fn deref(&self) -> &Self::Target {
        &self.collection
    }
}

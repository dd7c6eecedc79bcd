//! Group domain: collections composed into a tree.
//!
//! A [`GroupManager`] mirrors the groups the signed-in account belongs to
//! plus its pending invites and requests. Every [`Group`] owns member,
//! invite, request and ban lists and a [`ServerList`] with an optional
//! live status feed, and re-emits their changes as [`GroupEvent`]s.

mod group;
mod manager;
mod member;
mod server;

pub use group::{Group, GroupEvent, GroupInfo};
pub use manager::{GroupInvite, GroupManager, GroupRequest, ManagerEvent};
pub use member::{GroupMember, MemberInfo, MemberKind, MemberList, MemberLookup};
pub use server::{Server, ServerEvent, ServerInfo, ServerList, ServerStatus};

use crate::log::{default_log, Log};
use crate::transport::{Api, PushTransport};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Id of the signed-in account; keys the account-level feeds.
    pub user_id: u64,

    /// Page size requested from bulk routes.
    /// Default: 1000
    pub page_limit: usize,

    /// Attach newly created groups in the background: route their
    /// updates and load their server lists.
    /// Default: true
    pub attach_groups: bool,

    /// Logging capability handed to every collection.
    pub log: Arc<dyn Log>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_id: 0,
            page_limit: 1000,
            attach_groups: true,
            log: default_log(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("user_id", &self.user_id)
            .field("page_limit", &self.page_limit)
            .field("attach_groups", &self.attach_groups)
            .finish_non_exhaustive()
    }
}

/// Transports plus configuration, shared by every domain object.
#[derive(Clone)]
pub struct Client {
    pub api: Arc<dyn Api>,
    pub push: Arc<dyn PushTransport>,
    pub config: ClientConfig,
}

impl Client {
    pub fn new(api: Arc<dyn Api>, push: Arc<dyn PushTransport>, config: ClientConfig) -> Self {
        Self { api, push, config }
    }

    pub fn log(&self) -> &Arc<dyn Log> {
        &self.config.log
    }

    /// Run `task` in the background on the current runtime.
    ///
    /// Outside a runtime the task is skipped with a warning; callers can
    /// always drive the same work explicitly.
    pub(crate) fn spawn<F>(&self, component: &str, what: &str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
            }
            Err(_) => self
                .config
                .log
                .warn(component, &format!("No runtime, skipped {}", what)),
        }
    }
}

//! # Live Mirror
//!
//! Typed, locally cached mirrors of remote entity collections, kept current
//! by a bulk-fetch API plus a push feed of create/update/delete events.
//!
//! ## Core Concepts
//!
//! - **Live collections**: keyed, insertion-ordered containers that load once,
//!   subscribe once, then evolve purely from push events
//! - **Identity mapping**: one key derived from raw payloads and from items,
//!   so push events match cached items without re-fetching
//! - **Single-flight refresh**: concurrent callers share one bulk fetch and
//!   one registration, failures included
//! - **Event bridges**: typed observers that owners forward, renamed, onto
//!   their own event surface to build trees of collections
//! - **Status channels**: an optional per-item feed layered over a collection,
//!   polled item by item until it goes live
//!
//! ## Example
//!
//! ```ignore
//! use live_mirror::{Client, ClientConfig, GroupManager, GroupEvent};
//!
//! let client = Client::new(api, push, ClientConfig { user_id: 7, ..Default::default() });
//! let manager = GroupManager::new(client);
//!
//! // Load joined groups and follow joins/leaves
//! for group in manager.refresh(true).await? {
//!     group.events().listen(|event| {
//!         if let GroupEvent::MemberCreate(member) = event {
//!             println!("{} joined", member.username());
//!         }
//!     });
//!     group.members().refresh(true).await?;
//! }
//! ```

pub mod collection;
pub mod domain;
pub mod error;
pub mod events;
pub mod identity;
pub mod log;
pub mod transport;
pub mod types;

// Re-exports
pub use collection::{
    ApiSource, CollectionConfig, LiveCollection, PushChannels, SingleFlight, Source,
    StatusChannel, StatusReport, StatusSource, StatusState, WeakCollection,
};
pub use domain::{
    Client, ClientConfig, Group, GroupEvent, GroupInfo, GroupInvite, GroupManager, GroupMember,
    GroupRequest, ManagerEvent, MemberInfo, MemberKind, MemberList, MemberLookup, Server,
    ServerEvent, ServerInfo, ServerList, ServerStatus,
};
pub use error::{LiveError, Result};
pub use events::{CollectionEvent, EventBridge, EventHandle, EventKind, Listener};
pub use identity::{FieldIdentity, Identity};
pub use log::{default_log, Level, Log, LogLine, RecordingLog, TracingLog};
pub use transport::{push_handler, Api, MemoryApi, MemoryBus, Method, PushHandler, PushTransport};
pub use types::{Key, ListenerId, SubscriptionId, Topic};

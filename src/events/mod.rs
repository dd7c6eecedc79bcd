//! Typed observer surface for collections and their owners.
//!
//! Every live collection owns an [`EventBridge`] carrying
//! [`CollectionEvent`]s. Owners attach listeners, take bounded channel
//! handles, or forward events onto their own bridge under their own
//! vocabulary:
//!
//! ```ignore
//! let members = group.members();
//! members.events().forward(group.events(), |event| match event {
//!     CollectionEvent::Created(member) => Some(GroupEvent::MemberCreate(member.clone())),
//!     _ => None,
//! });
//! ```

mod bridge;
mod types;

pub use bridge::{EventBridge, EventHandle, Listener};
pub use types::{CollectionEvent, EventKind};

//! Live collections: keyed, insertion-ordered mirrors of a remote set.
//!
//! A collection is bound to a [`Source`] for bulk and single fetches, an
//! optional set of [`PushChannels`] for create/delete/update feeds, and an
//! [`Identity`](crate::identity::Identity) that maps payloads to keys and
//! items. It loads once (single-flight), subscribes at most once, and from
//! then on evolves only through push events.
//!
//! # Example
//!
//! ```ignore
//! let servers = LiveCollection::new(
//!     CollectionConfig::named("servers"),
//!     FieldIdentity::new("id", |s: &ServerInfo| Key(s.id)),
//!     Some(Arc::new(ApiSource::new(api.clone(), "servers"))),
//!     Some(PushChannels::new(bus.clone(), create_topic, delete_topic)),
//! );
//!
//! let items = servers.refresh(true).await?;
//! servers.events().listen(|event| println!("{:?}", event.kind()));
//! ```

mod config;
mod coordinator;
mod live;
mod source;
mod status;

pub use config::{CollectionConfig, PushChannels};
pub use coordinator::SingleFlight;
pub use live::{LiveCollection, WeakCollection};
pub(crate) use source::into_payloads;
pub use source::{ApiSource, Source};
pub use status::{StatusChannel, StatusReport, StatusSource, StatusState};

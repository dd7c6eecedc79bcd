//! Collaborator interfaces: request/response calls and push feeds.
//!
//! The core depends only on these traits. Any transport satisfying them
//! (HTTP polling, WebSocket push, a message queue) is interchangeable;
//! retry, backoff and timeouts are the transport's concern.

mod api;
mod memory;
mod push;

pub use api::{Api, Method};
pub use memory::{Call, Gate, MemoryApi, MemoryBus};
pub use push::{push_handler, PushHandler, PushTransport};

//! Core types shared across collections and transports.

use crate::error::{LiveError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Canonical identity of a remote entity (its numeric remote id).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(pub u64);

impl Key {
    /// Read a key from a numeric field of a JSON object.
    ///
    /// Accepts numbers and numeric strings, since some feeds quote ids.
    pub fn from_field(raw: &Value, field: &str) -> Result<Self> {
        match raw.get(field) {
            Some(value) => Self::from_value(value)
                .ok_or_else(|| LiveError::decode(format!("field `{}` is not an id: {}", field, value))),
            None => Err(LiveError::decode(format!("missing key field `{}`", field))),
        }
    }

    /// Interpret a JSON scalar as a key.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().map(Key),
            Value::String(s) => s.trim().parse().ok().map(Key),
            _ => None,
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.0)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Key {
    fn from(id: u64) -> Self {
        Key(id)
    }
}

/// A named, keyed push feed, e.g. `group-member-create` for group 42.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    pub event: String,
    pub key: Key,
}

impl Topic {
    pub fn new(event: impl Into<String>, key: impl Into<Key>) -> Self {
        Self {
            event: event.into(),
            key: key.into(),
        }
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({}/{})", self.event, self.key)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.event, self.key)
    }
}

/// Handle returned by a push transport for one registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Identifier of a listener attached to an event bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

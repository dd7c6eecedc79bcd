//! Identity mapping between raw payloads and materialized items.
//!
//! A collection matches push events (raw JSON) against cached items
//! (materialized values) purely by key, so both directions must agree:
//! for any payload `p`, `raw_key(p) == item_key(materialize(p))`.

use crate::error::Result;
use crate::types::Key;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// Derives keys and materializes items for one collection.
pub trait Identity<T>: Send + Sync {
    /// Key of a raw payload.
    fn raw_key(&self, raw: &Value) -> Result<Key>;

    /// Key of a materialized item.
    fn item_key(&self, item: &T) -> Key;

    /// Build an item from a raw payload.
    fn materialize(&self, raw: Value) -> Result<T>;

    /// Re-issue an existing item with a new backing payload.
    ///
    /// Items that own child state (nested collections, status cells)
    /// override this to carry that state over to the new value.
    fn merge(&self, _current: &Arc<T>, raw: Value) -> Result<T> {
        self.materialize(raw)
    }
}

/// Identity for plain deserializable items keyed by one numeric field.
pub struct FieldIdentity<T, F> {
    field: &'static str,
    key_of: F,
    _item: PhantomData<fn() -> T>,
}

impl<T, F> FieldIdentity<T, F>
where
    F: Fn(&T) -> Key,
{
    pub fn new(field: &'static str, key_of: F) -> Self {
        Self {
            field,
            key_of,
            _item: PhantomData,
        }
    }
}

impl<T, F> Identity<T> for FieldIdentity<T, F>
where
    T: DeserializeOwned,
    F: Fn(&T) -> Key + Send + Sync,
{
    fn raw_key(&self, raw: &Value) -> Result<Key> {
        Key::from_field(raw, self.field)
    }

    fn item_key(&self, item: &T) -> Key {
        (self.key_of)(item)
    }

    fn materialize(&self, raw: Value) -> Result<T> {
        Ok(serde_json::from_value(raw)?)
    }
}

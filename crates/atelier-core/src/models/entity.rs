use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::Collection;
use crate::constants::TEMP_ID_PREFIX;

/// Key used for deterministic display order and for matching optimistic
/// entries against confirmed ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OrderingKey {
    Sequence(u64),
    Path(String),
    Timestamp(DateTime<Utc>),
}

/// A record living in one collection, addressable by `id`.
///
/// Serialized form must carry the id under the `id` field; the cache and the
/// remote store use it as the join key.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    const COLLECTION: Collection;

    /// Field the remote store orders list results by.
    const ORDER_FIELD: &'static str;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    /// Parent identifier. `None` for unscoped collections.
    fn scope(&self) -> Option<&str>;

    fn ordering_key(&self) -> OrderingKey;

    /// Whether `confirmed` is the remote echo of this optimistic entry.
    fn reconciles_with(&self, confirmed: &Self) -> bool {
        self.scope() == confirmed.scope() && self.ordering_key() == confirmed.ordering_key()
    }

    fn is_temporary(&self) -> bool {
        is_temp_id(self.id())
    }
}

pub fn new_temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4().simple())
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// `None` as the requested scope matches every entity.
pub fn scope_matches(requested: Option<&str>, actual: Option<&str>) -> bool {
    match requested {
        None => true,
        Some(scope) => actual == Some(scope),
    }
}

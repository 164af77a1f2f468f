//! Interfaces consumed from the backend platform: a request/response document
//! store and a broadcast push channel. Both are opaque; documents cross this
//! boundary as JSON objects carrying an `id` field.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::RemoteError;
use crate::models::Collection;

pub type Document = Value;

/// Identifies this running client on every remote write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Documents of `collection` under `scope` (all when `None`), ascending by
    /// `order_by`.
    async fn list(
        &self,
        collection: Collection,
        scope: Option<&str>,
        order_by: &str,
    ) -> Result<Vec<Document>, RemoteError>;

    /// Create a document. The store assigns an id when `id` is `None`.
    async fn create(
        &self,
        collection: Collection,
        id: Option<&str>,
        payload: Document,
        origin: &ClientId,
    ) -> Result<Document, RemoteError>;

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Document,
        origin: &ClientId,
    ) -> Result<Document, RemoteError>;

    async fn delete(
        &self,
        collection: Collection,
        id: &str,
        origin: &ClientId,
    ) -> Result<(), RemoteError>;
}

/// Message as delivered by the push channel, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPushMessage {
    /// Tag set, e.g. `collections.files.documents.abc.update`.
    pub events: Vec<String>,
    pub payload: Document,
    /// Client that issued the write, when the store echoes it.
    #[serde(default)]
    pub origin: Option<ClientId>,
}

pub trait PushChannel: Send + Sync {
    /// Open `channel`. Dropping the receiver unsubscribes.
    fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<RawPushMessage>, RemoteError>;
}

/// Shallow field merge: every top-level field of `patch` replaces the one in
/// `target`. Non-object values replace `target` wholesale.
pub fn merge_document(target: &mut Document, patch: &Document) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(fields), Some(updates)) => {
            for (key, value) in updates {
                fields.insert(key.clone(), value.clone());
            }
        }
        _ => *target = patch.clone(),
    }
}

/// The `id` field of a document, if present.
pub fn document_id(document: &Document) -> Option<&str> {
    document.get("id").and_then(Value::as_str)
}

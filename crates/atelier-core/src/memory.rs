//! In-process backend implementing both [`RemoteStore`] and [`PushChannel`].
//!
//! Every write is journaled and broadcast on the collection's channel, tagged
//! with the writing client. Failures and latency can be injected so callers
//! can exercise error and in-flight paths without a network.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::constants::PUSH_CHANNEL_CAPACITY;
use crate::error::RemoteError;
use crate::models::Collection;
use crate::realtime::EventKind;
use crate::remote::{
    document_id, merge_document, ClientId, Document, PushChannel, RawPushMessage, RemoteStore,
};

/// One request received by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    List {
        collection: Collection,
        scope: Option<String>,
    },
    Create {
        collection: Collection,
        id: String,
        payload: Document,
    },
    Update {
        collection: Collection,
        id: String,
        patch: Document,
    },
    Delete {
        collection: Collection,
        id: String,
    },
}

#[derive(Default)]
struct BackendState {
    documents: HashMap<Collection, Vec<Document>>,
    journal: Vec<RemoteCall>,
    failure: Option<RemoteError>,
    latency: Duration,
    next_id: u64,
}

pub struct InMemoryBackend {
    state: Mutex<BackendState>,
    channels: Mutex<HashMap<String, broadcast::Sender<RawPushMessage>>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState::default()),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Store documents directly, without journaling or broadcasting.
    pub fn seed(&self, collection: Collection, documents: impl IntoIterator<Item = Document>) {
        let mut state = self.state.lock();
        state.documents.entry(collection).or_default().extend(documents);
    }

    pub fn documents(&self, collection: Collection) -> Vec<Document> {
        self.state
            .lock()
            .documents
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn document(&self, collection: Collection, id: &str) -> Option<Document> {
        self.documents(collection)
            .into_iter()
            .find(|doc| document_id(doc) == Some(id))
    }

    pub fn journal(&self) -> Vec<RemoteCall> {
        self.state.lock().journal.clone()
    }

    /// Patches received for `id`, in arrival order.
    pub fn updates_for(&self, id: &str) -> Vec<Document> {
        self.journal()
            .into_iter()
            .filter_map(|call| match call {
                RemoteCall::Update { id: target, patch, .. } if target == id => Some(patch),
                _ => None,
            })
            .collect()
    }

    /// Fail every subsequent request with `error` until [`recover`] is called.
    ///
    /// [`recover`]: InMemoryBackend::recover
    pub fn fail_with(&self, error: RemoteError) {
        self.state.lock().failure = Some(error);
    }

    pub fn recover(&self) {
        self.state.lock().failure = None;
    }

    /// Delay every request by `latency` before it is applied.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Drop every channel; open subscriptions observe a closed channel.
    pub fn disconnect(&self) {
        self.channels.lock().clear();
    }

    /// Broadcast an event as if another session had written `payload`.
    pub fn publish(
        &self,
        collection: Collection,
        kind: EventKind,
        payload: Document,
        origin: Option<ClientId>,
    ) {
        let channel = collection.channel_name();
        let id = document_id(&payload).unwrap_or("*").to_string();
        let action = match kind {
            EventKind::Created => "create",
            EventKind::Updated => "update",
            EventKind::Deleted => "delete",
        };
        let message = RawPushMessage {
            events: vec![
                format!("{}.{}.{}", channel, id, action),
                format!("{}.*.{}", channel, action),
            ],
            payload,
            origin,
        };
        if let Some(tx) = self.channels.lock().get(&channel) {
            let _ = tx.send(message);
        }
    }

    async fn begin(&self, call: RemoteCall) -> Result<(), RemoteError> {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        state.journal.push(call);
        match &state.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryBackend {
    async fn list(
        &self,
        collection: Collection,
        scope: Option<&str>,
        order_by: &str,
    ) -> Result<Vec<Document>, RemoteError> {
        self.begin(RemoteCall::List {
            collection,
            scope: scope.map(str::to_string),
        })
        .await?;

        let mut documents: Vec<Document> = self
            .documents(collection)
            .into_iter()
            .filter(|doc| match (scope, collection.scope_field()) {
                (Some(scope), Some(field)) => doc.get(field).and_then(Value::as_str) == Some(scope),
                _ => true,
            })
            .collect();
        documents.sort_by(|a, b| compare_field(a.get(order_by), b.get(order_by)));
        Ok(documents)
    }

    async fn create(
        &self,
        collection: Collection,
        id: Option<&str>,
        payload: Document,
        origin: &ClientId,
    ) -> Result<Document, RemoteError> {
        let id = match id {
            Some(id) => id.to_string(),
            None => {
                let mut state = self.state.lock();
                state.next_id += 1;
                format!("srv_{}", state.next_id)
            }
        };
        self.begin(RemoteCall::Create {
            collection,
            id: id.clone(),
            payload: payload.clone(),
        })
        .await?;

        let mut document = payload;
        merge_document(&mut document, &serde_json::json!({ "id": id }));
        {
            let mut state = self.state.lock();
            let documents = state.documents.entry(collection).or_default();
            if documents.iter().any(|doc| document_id(doc) == Some(id.as_str())) {
                return Err(RemoteError::Rejected(format!("duplicate id {}", id)));
            }
            documents.push(document.clone());
        }
        self.publish(collection, EventKind::Created, document.clone(), Some(origin.clone()));
        Ok(document)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Document,
        origin: &ClientId,
    ) -> Result<Document, RemoteError> {
        self.begin(RemoteCall::Update {
            collection,
            id: id.to_string(),
            patch: patch.clone(),
        })
        .await?;

        let document = {
            let mut state = self.state.lock();
            let slot = state
                .documents
                .entry(collection)
                .or_default()
                .iter_mut()
                .find(|doc| document_id(doc) == Some(id))
                .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
            merge_document(slot, &patch);
            slot.clone()
        };
        self.publish(collection, EventKind::Updated, document.clone(), Some(origin.clone()));
        Ok(document)
    }

    async fn delete(
        &self,
        collection: Collection,
        id: &str,
        origin: &ClientId,
    ) -> Result<(), RemoteError> {
        self.begin(RemoteCall::Delete {
            collection,
            id: id.to_string(),
        })
        .await?;

        let removed = {
            let mut state = self.state.lock();
            let documents = state.documents.entry(collection).or_default();
            let position = documents
                .iter()
                .position(|doc| document_id(doc) == Some(id))
                .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
            documents.remove(position)
        };
        self.publish(collection, EventKind::Deleted, removed, Some(origin.clone()));
        Ok(())
    }
}

impl PushChannel for InMemoryBackend {
    fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<RawPushMessage>, RemoteError> {
        let mut channels = self.channels.lock();
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(PUSH_CHANNEL_CAPACITY).0);
        Ok(tx.subscribe())
    }
}

fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

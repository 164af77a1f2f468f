//! Push-event subscription.
//!
//! One logical channel exists per collection. Every message is decoded once
//! into a closed [`PushEvent`], filtered against the subscriber's scope and
//! dispatched to its [`PushHandler`]. Delivery order is the channel's order;
//! nothing is buffered, reordered or deduplicated here.
//!
//! If the channel closes, the subscription ends silently and later events are
//! lost. Recovery is a full resync by the owning store.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::models::{scope_matches, Entity};
use crate::remote::{document_id, ClientId, PushChannel, RawPushMessage};
use crate::stats::SharedSyncStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    /// Classify a tag set by its action suffix. The first classifiable tag
    /// decides.
    pub fn from_tags<S: AsRef<str>>(tags: &[S]) -> Option<Self> {
        tags.iter().find_map(|tag| {
            match tag.as_ref().rsplit('.').next() {
                Some("create") => Some(EventKind::Created),
                Some("update") => Some(EventKind::Updated),
                Some("delete") => Some(EventKind::Deleted),
                _ => None,
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent<E> {
    Created(E),
    Updated(E),
    Deleted { id: String, scope: Option<String> },
}

impl<E: Entity> PushEvent<E> {
    pub fn decode(raw: &RawPushMessage) -> Result<Self> {
        let kind = EventKind::from_tags(&raw.events)
            .ok_or_else(|| SyncError::Decode(format!("unclassified tags {:?}", raw.events)))?;

        match kind {
            EventKind::Created => Ok(PushEvent::Created(serde_json::from_value(raw.payload.clone())?)),
            EventKind::Updated => Ok(PushEvent::Updated(serde_json::from_value(raw.payload.clone())?)),
            EventKind::Deleted => {
                // Delete payloads may be partial; only id and scope are needed.
                let id = document_id(&raw.payload)
                    .ok_or_else(|| SyncError::Decode("delete event without id".to_string()))?
                    .to_string();
                let scope = E::COLLECTION
                    .scope_field()
                    .and_then(|field| raw.payload.get(field))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                Ok(PushEvent::Deleted { id, scope })
            }
        }
    }

    pub fn id(&self) -> &str {
        match self {
            PushEvent::Created(entity) | PushEvent::Updated(entity) => entity.id(),
            PushEvent::Deleted { id, .. } => id,
        }
    }

    pub fn scope(&self) -> Option<&str> {
        match self {
            PushEvent::Created(entity) | PushEvent::Updated(entity) => entity.scope(),
            PushEvent::Deleted { scope, .. } => scope.as_deref(),
        }
    }
}

/// Whether a push event echoes a write made by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    SelfOriginated,
    External,
}

pub trait PushHandler<E>: Send + Sync {
    fn on_create(&self, entity: E, origin: Origin);
    fn on_update(&self, entity: E, origin: Origin);
    fn on_delete(&self, id: String);
}

/// Live subscription. Dropping it unsubscribes.
pub struct Subscription {
    channel: String,
    scope: Option<String>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// False once the channel has closed.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone)]
pub struct RealtimeSubscriber {
    channel: Arc<dyn PushChannel>,
    client_id: ClientId,
    stats: SharedSyncStats,
}

impl RealtimeSubscriber {
    pub fn new(channel: Arc<dyn PushChannel>, client_id: ClientId, stats: SharedSyncStats) -> Self {
        Self {
            channel,
            client_id,
            stats,
        }
    }

    /// Subscribe to `E`'s collection, receiving only events for `scope`
    /// (every scope when `None`). Must be called inside a tokio runtime.
    pub fn subscribe<E: Entity>(
        &self,
        scope: Option<&str>,
        handler: Arc<dyn PushHandler<E>>,
    ) -> Result<Subscription> {
        let channel = E::COLLECTION.channel_name();
        let mut rx = self
            .channel
            .subscribe(&channel)
            .map_err(|e| SyncError::Subscription {
                channel: channel.clone(),
                reason: e.to_string(),
            })?;

        let scope = scope.map(str::to_string);
        let task_scope = scope.clone();
        let task_channel = channel.clone();
        let client_id = self.client_id.clone();
        let stats = self.stats.clone();

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(raw) => dispatch(&raw, task_scope.as_deref(), &client_id, handler.as_ref(), &stats),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("realtime: {} lagged, {} events lost", task_channel, skipped);
                    }
                    Err(RecvError::Closed) => {
                        info!("realtime: {} closed", task_channel);
                        break;
                    }
                }
            }
        });

        debug!("realtime: subscribed to {} (scope={:?})", channel, scope);
        Ok(Subscription { channel, scope, task })
    }
}

fn dispatch<E: Entity>(
    raw: &RawPushMessage,
    scope: Option<&str>,
    client_id: &ClientId,
    handler: &dyn PushHandler<E>,
    stats: &SharedSyncStats,
) {
    let event = match PushEvent::<E>::decode(raw) {
        Ok(event) => event,
        Err(e) => {
            debug!("realtime: dropping {} event: {}", E::COLLECTION, e);
            stats.record_discarded(E::COLLECTION);
            return;
        }
    };

    if !scope_matches(scope, event.scope()) {
        stats.record_discarded(E::COLLECTION);
        return;
    }

    let origin = if raw.origin.as_ref() == Some(client_id) {
        Origin::SelfOriginated
    } else {
        Origin::External
    };

    stats.record_delivered(E::COLLECTION);
    match event {
        PushEvent::Created(entity) => handler.on_create(entity, origin),
        PushEvent::Updated(entity) => handler.on_update(entity, origin),
        PushEvent::Deleted { id, .. } => handler.on_delete(id),
    }
}

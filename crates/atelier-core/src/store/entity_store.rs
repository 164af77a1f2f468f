//! In-memory view of one collection, kept consistent with the local cache
//! and the remote store.
//!
//! Writes land in memory and in the cache first. Content edits are then
//! coalesced by the [`WriteScheduler`]; structural operations are awaited.
//! Push events are reconciled as they arrive:
//!
//! - a create whose id is already known replaces that entry;
//! - otherwise the first pending optimistic entry that
//!   [`Entity::reconciles_with`] the event is swapped for it, in memory and in
//!   the cache, and leaves the pending set;
//! - otherwise the event is a new entity from elsewhere and is appended.
//!
//! Two identical optimistic entries are indistinguishable; the earliest one
//! absorbs the first confirmation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::LocalCache;
use crate::constants::CHANGE_CHANNEL_CAPACITY;
use crate::error::{Result, SyncError};
use crate::models::{is_temp_id, new_temp_id, scope_matches, Entity};
use crate::realtime::{Origin, PushHandler, RealtimeSubscriber, Subscription};
use crate::remote::{merge_document, Document};
use crate::scheduler::{ImmediateOperation, OperationOutcome, WriteRequest, WriteScheduler};

/// Notification emitted after the store's view changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Inserted { id: String },
    Updated { id: String },
    Removed { id: String },
    /// An optimistic entry was confirmed under its remote id.
    Replaced { temp_id: String, id: String },
    /// A scope (or everything, for `None`) was reloaded or cleared.
    Reloaded { scope: Option<String> },
}

pub struct EntityStore<E: Entity> {
    items: RwLock<Vec<E>>,
    /// Temporary ids still awaiting their confirmation event.
    pending: Mutex<HashSet<String>>,
    cache: Arc<LocalCache>,
    scheduler: WriteScheduler,
    subscriber: RealtimeSubscriber,
    subscriptions: Mutex<HashMap<Option<String>, Subscription>>,
    changes: broadcast::Sender<StoreChange>,
    skip_stale_self_echoes: bool,
}

impl<E: Entity> EntityStore<E> {
    pub fn new(
        cache: Arc<LocalCache>,
        scheduler: WriteScheduler,
        subscriber: RealtimeSubscriber,
        skip_stale_self_echoes: bool,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            items: RwLock::new(Vec::new()),
            pending: Mutex::new(HashSet::new()),
            cache,
            scheduler,
            subscriber,
            subscriptions: Mutex::new(HashMap::new()),
            changes,
            skip_stale_self_echoes,
        }
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    // ===== Reads =====

    /// Entities in `scope` (all when `None`), sorted by ordering key.
    pub fn get_all(&self, scope: Option<&str>) -> Vec<E> {
        let mut items: Vec<E> = self
            .items
            .read()
            .iter()
            .filter(|e| scope_matches(scope, e.scope()))
            .cloned()
            .collect();
        items.sort_by_key(|e| e.ordering_key());
        items
    }

    pub fn get(&self, id: &str) -> Option<E> {
        self.items.read().iter().find(|e| e.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.lock().contains(id)
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.pending.lock().iter().cloned().collect()
    }

    pub fn is_subscribed(&self, scope: Option<&str>) -> bool {
        self.subscriptions
            .lock()
            .get(&scope.map(str::to_string))
            .is_some_and(Subscription::is_active)
    }

    // ===== Hydration and sync =====

    /// Replace the in-memory view of `scope` with what the cache holds.
    /// Cached entries under temporary ids come back as pending.
    pub fn load_from_cache(&self, scope: Option<&str>) -> Vec<E> {
        let cached = self.cache.get_by_filter::<E>(|e| scope_matches(scope, e.scope()));
        {
            let mut items = self.items.write();
            let mut pending = self.pending.lock();
            items.retain(|e| !scope_matches(scope, e.scope()));
            for entity in &cached {
                if entity.is_temporary() {
                    pending.insert(entity.id().to_string());
                }
            }
            items.extend(cached);
        }
        debug!("store: loaded {} {:?} from cache", E::COLLECTION, scope);
        self.notify(StoreChange::Reloaded {
            scope: scope.map(str::to_string),
        });
        self.get_all(scope)
    }

    /// Subscribe to `scope`, fetch its authoritative contents and merge them
    /// into memory and cache. Pending optimistic entries and entities with a
    /// queued or failed local write keep their local version.
    pub async fn sync_with_remote(self: &Arc<Self>, scope: Option<&str>) -> Result<Vec<E>> {
        self.subscribe(scope)?;

        let documents = self
            .scheduler
            .remote()
            .list(E::COLLECTION, scope, E::ORDER_FIELD)
            .await?;

        let fetched: Vec<E> = documents
            .into_iter()
            .filter_map(|doc| match serde_json::from_value::<E>(doc) {
                Ok(entity) => Some(entity),
                Err(e) => {
                    warn!("store: skipping undecodable {} document: {}", E::COLLECTION, e);
                    None
                }
            })
            .collect();
        let fetched_count = fetched.len();

        let merged: Vec<E> = {
            let mut items = self.items.write();
            let pending = self.pending.lock();
            let mut local: HashMap<String, E> = items
                .iter()
                .filter(|e| scope_matches(scope, e.scope()))
                .map(|e| (e.id().to_string(), e.clone()))
                .collect();

            let mut merged: Vec<E> = fetched
                .into_iter()
                .map(|remote| match local.remove(remote.id()) {
                    Some(mine) if self.scheduler.has_unsent(mine.id()) => mine,
                    _ => remote,
                })
                .collect();
            merged.extend(local.into_values().filter(|e| pending.contains(e.id())));

            items.retain(|e| !scope_matches(scope, e.scope()));
            items.extend(merged.iter().cloned());
            merged
        };

        match scope {
            Some(scope) => self.cache.replace_scope(scope, &merged),
            None => self.cache.set_items(&merged),
        }

        info!(
            "store: synced {} {:?} ({} remote, {} kept)",
            E::COLLECTION,
            scope,
            fetched_count,
            merged.len()
        );
        self.notify(StoreChange::Reloaded {
            scope: scope.map(str::to_string),
        });
        Ok(self.get_all(scope))
    }

    /// Open (or reopen) the push subscription for `scope`.
    pub fn subscribe(self: &Arc<Self>, scope: Option<&str>) -> Result<()> {
        let handler: Arc<dyn PushHandler<E>> = Arc::new(StoreHandler {
            store: Arc::downgrade(self),
        });
        let subscription = self.subscriber.subscribe::<E>(scope, handler)?;
        self.subscriptions
            .lock()
            .insert(scope.map(str::to_string), subscription);
        Ok(())
    }

    pub fn unsubscribe(&self, scope: Option<&str>) -> bool {
        self.subscriptions
            .lock()
            .remove(&scope.map(str::to_string))
            .is_some()
    }

    pub fn unsubscribe_all(&self) {
        self.subscriptions.lock().clear();
    }

    // ===== Local mutations =====

    /// Record a not-yet-persisted entity under a temporary id. No remote call
    /// is made; the caller issues the create.
    pub fn add_optimistic(&self, mut entity: E) -> E {
        if !entity.is_temporary() {
            entity.set_id(new_temp_id());
        }
        let id = entity.id().to_string();
        {
            let mut items = self.items.write();
            self.pending.lock().insert(id.clone());
            items.push(entity.clone());
        }
        self.cache.insert(&entity);
        self.notify(StoreChange::Inserted { id });
        entity
    }

    /// Insert or replace an already-confirmed entity.
    pub fn upsert(&self, entity: E) {
        let id = entity.id().to_string();
        let existed = {
            let mut items = self.items.write();
            match items.iter().position(|e| e.id() == id) {
                Some(index) => {
                    items[index] = entity.clone();
                    true
                }
                None => {
                    items.push(entity.clone());
                    false
                }
            }
        };
        self.cache.insert(&entity);
        self.notify(if existed {
            StoreChange::Updated { id }
        } else {
            StoreChange::Inserted { id }
        });
    }

    /// Replace an entity locally and queue a coalesced write of it.
    pub fn update(&self, entity: E) -> Result<()> {
        let id = entity.id().to_string();
        {
            let mut items = self.items.write();
            let slot = items
                .iter_mut()
                .find(|e| e.id() == id)
                .ok_or_else(|| self.unknown(&id))?;
            *slot = entity.clone();
        }
        self.cache.insert(&entity);
        self.notify(StoreChange::Updated { id: id.clone() });

        if !is_temp_id(&id) {
            let mut payload = serde_json::to_value(&entity)?;
            if let Some(fields) = payload.as_object_mut() {
                fields.remove("id");
            }
            self.queue_write(&entity, payload);
        }
        Ok(())
    }

    /// Merge `patch` into an entity locally and queue a coalesced write of
    /// just those fields.
    pub fn patch(&self, id: &str, patch: Document) -> Result<E> {
        let updated = {
            let mut items = self.items.write();
            let slot = items
                .iter_mut()
                .find(|e| e.id() == id)
                .ok_or_else(|| self.unknown(id))?;
            let mut document = serde_json::to_value(&*slot)?;
            merge_document(&mut document, &patch);
            let updated: E = serde_json::from_value(document)?;
            *slot = updated.clone();
            updated
        };
        self.cache.update::<E>(id, &patch);
        self.notify(StoreChange::Updated { id: id.to_string() });

        if !is_temp_id(id) {
            self.queue_write(&updated, patch);
        }
        Ok(updated)
    }

    /// Apply `f` to a copy of the entity and store the result via [`update`].
    ///
    /// [`update`]: EntityStore::update
    pub fn modify(&self, id: &str, f: impl FnOnce(&mut E)) -> Result<E> {
        let mut entity = self.get(id).ok_or_else(|| self.unknown(id))?;
        f(&mut entity);
        self.update(entity.clone())?;
        Ok(entity)
    }

    // ===== Structural operations =====

    /// Create `entity` remotely and store the confirmed record. A temporary
    /// id is not sent; the remote store assigns the real one and the entry
    /// under the temporary id is replaced.
    pub async fn create(&self, entity: E) -> Result<E> {
        let temp_id = entity.is_temporary().then(|| entity.id().to_string());
        let requested_id = (temp_id.is_none() && !entity.id().is_empty())
            .then(|| entity.id().to_string());
        let mut payload = serde_json::to_value(&entity)?;
        if let Some(fields) = payload.as_object_mut() {
            fields.remove("id");
        }

        let outcome = self
            .scheduler
            .execute_immediate_operation(ImmediateOperation::Create {
                collection: E::COLLECTION,
                id: requested_id,
                payload,
            })
            .await?;
        let document = match outcome {
            OperationOutcome::Created(document) => document,
            other => {
                return Err(SyncError::Decode(format!(
                    "create in {} returned {:?}",
                    E::COLLECTION,
                    other
                )))
            }
        };
        let confirmed: E = serde_json::from_value(document)?;
        match temp_id {
            Some(temp_id) => self.confirm_created(&temp_id, confirmed.clone()),
            None => self.apply_created(confirmed.clone(), Origin::SelfOriginated),
        }
        Ok(confirmed)
    }

    /// Apply `patch` remotely right away (e.g. a path change) and store the
    /// confirmed record.
    pub async fn rename(&self, id: &str, patch: Document) -> Result<E> {
        if self.get(id).is_none() {
            return Err(self.unknown(id));
        }
        if is_temp_id(id) {
            return self.patch(id, patch);
        }
        let outcome = self
            .scheduler
            .execute_immediate_operation(ImmediateOperation::Rename {
                collection: E::COLLECTION,
                id: id.to_string(),
                patch,
            })
            .await?;
        let document = match outcome {
            OperationOutcome::Renamed(document) => document,
            other => {
                return Err(SyncError::Decode(format!(
                    "rename in {} returned {:?}",
                    E::COLLECTION,
                    other
                )))
            }
        };
        let confirmed: E = serde_json::from_value(document)?;
        self.upsert(confirmed.clone());
        Ok(confirmed)
    }

    /// Remove an entity locally and remotely. Entities still under a
    /// temporary id were never persisted and are only removed locally. If the
    /// remote delete fails the entity is restored and the error returned.
    pub async fn delete(&self, id: &str) -> Result<Option<E>> {
        let removed = self.remove_local(id);
        if is_temp_id(id) {
            self.scheduler.cancel_pending_write(id);
            return Ok(removed);
        }

        let result = self
            .scheduler
            .execute_immediate_operation(ImmediateOperation::Delete {
                collection: E::COLLECTION,
                id: id.to_string(),
            })
            .await;

        if let Err(e) = result {
            warn!("store: delete of {} {} failed: {}", E::COLLECTION, id, e);
            if let Some(entity) = removed {
                self.upsert(entity);
            }
            return Err(e);
        }
        Ok(removed)
    }

    /// Drop everything belonging to `scope` from memory and cache, cancel its
    /// queued writes and close its subscription. Returns how many entities
    /// were removed from memory.
    pub fn clear_scope(&self, scope: &str) -> usize {
        let removed: Vec<String> = {
            let mut items = self.items.write();
            let mut pending = self.pending.lock();
            let mut removed = Vec::new();
            items.retain(|e| {
                if e.scope() == Some(scope) {
                    pending.remove(e.id());
                    removed.push(e.id().to_string());
                    false
                } else {
                    true
                }
            });
            removed
        };
        for id in &removed {
            self.scheduler.cancel_pending_write(id);
        }
        let cached = self.cache.delete_scope::<E>(scope);
        self.unsubscribe(Some(scope));

        info!(
            "store: cleared {} scope {} ({} in memory, {} cached)",
            E::COLLECTION,
            scope,
            removed.len(),
            cached
        );
        self.notify(StoreChange::Reloaded {
            scope: Some(scope.to_string()),
        });
        removed.len()
    }

    // ===== Reconciliation =====

    pub fn apply_created(&self, confirmed: E, origin: Origin) {
        let id = confirmed.id().to_string();
        let change = {
            let mut items = self.items.write();
            let mut pending = self.pending.lock();

            if let Some(index) = items.iter().position(|e| e.id() == id) {
                items[index] = confirmed.clone();
                StoreChange::Updated { id: id.clone() }
            } else if let Some(index) = items
                .iter()
                .position(|e| pending.contains(e.id()) && e.reconciles_with(&confirmed))
            {
                let temp_id = items[index].id().to_string();
                pending.remove(&temp_id);
                items[index] = confirmed.clone();
                StoreChange::Replaced {
                    temp_id,
                    id: id.clone(),
                }
            } else {
                items.push(confirmed.clone());
                StoreChange::Inserted { id: id.clone() }
            }
        };

        match &change {
            StoreChange::Replaced { temp_id, .. } => {
                debug!("store: reconciled {} {} -> {} ({:?})", E::COLLECTION, temp_id, id, origin);
                self.scheduler.cancel_pending_write(temp_id);
                self.cache.replace(temp_id, &confirmed);
            }
            _ => self.cache.insert(&confirmed),
        }
        self.notify(change);
    }

    /// Replace the optimistic entry `temp_id` with its confirmed record.
    fn confirm_created(&self, temp_id: &str, confirmed: E) {
        let id = confirmed.id().to_string();
        let (change, dropped_temp) = {
            let mut items = self.items.write();
            self.pending.lock().remove(temp_id);
            let temp_index = items.iter().position(|e| e.id() == temp_id);
            match (items.iter().position(|e| e.id() == id), temp_index) {
                // The push echo got here first and took another slot.
                (Some(index), temp_index) => {
                    items[index] = confirmed.clone();
                    if let Some(t) = temp_index {
                        items.remove(t);
                    }
                    (StoreChange::Updated { id: id.clone() }, temp_index.is_some())
                }
                (None, Some(t)) => {
                    items[t] = confirmed.clone();
                    let change = StoreChange::Replaced {
                        temp_id: temp_id.to_string(),
                        id: id.clone(),
                    };
                    (change, false)
                }
                (None, None) => {
                    items.push(confirmed.clone());
                    (StoreChange::Inserted { id: id.clone() }, false)
                }
            }
        };

        self.scheduler.cancel_pending_write(temp_id);
        if matches!(change, StoreChange::Replaced { .. }) {
            self.cache.replace(temp_id, &confirmed);
        } else {
            self.cache.insert(&confirmed);
        }
        debug!("store: confirmed {} {} -> {}", E::COLLECTION, temp_id, id);
        self.notify(change);
        if dropped_temp {
            self.cache.delete::<E>(temp_id);
            self.notify(StoreChange::Removed {
                id: temp_id.to_string(),
            });
        }
    }

    pub fn apply_updated(&self, entity: E, origin: Origin) {
        if origin == Origin::SelfOriginated
            && self.skip_stale_self_echoes
            && self.scheduler.has_pending(entity.id())
        {
            debug!("store: ignoring stale echo for {} {}", E::COLLECTION, entity.id());
            return;
        }
        self.upsert(entity);
    }

    pub fn apply_deleted(&self, id: &str) {
        self.scheduler.cancel_pending_write(id);
        if self.remove_local(id).is_some() {
            debug!("store: remote deleted {} {}", E::COLLECTION, id);
        }
    }

    // ===== Internals =====

    fn remove_local(&self, id: &str) -> Option<E> {
        let removed = {
            let mut items = self.items.write();
            self.pending.lock().remove(id);
            let position = items.iter().position(|e| e.id() == id);
            position.map(|p| items.remove(p))
        };
        self.cache.delete::<E>(id);
        if removed.is_some() {
            self.notify(StoreChange::Removed { id: id.to_string() });
        }
        removed
    }

    fn queue_write(&self, entity: &E, payload: Document) {
        self.scheduler.schedule_debounced_write(WriteRequest {
            collection: E::COLLECTION,
            entity_id: entity.id().to_string(),
            payload,
            scope: entity.scope().map(str::to_string),
        });
    }

    fn unknown(&self, id: &str) -> SyncError {
        SyncError::UnknownEntity {
            collection: E::COLLECTION,
            id: id.to_string(),
        }
    }

    fn notify(&self, change: StoreChange) {
        let _ = self.changes.send(change);
    }

    pub(crate) fn scheduler(&self) -> &WriteScheduler {
        &self.scheduler
    }
}

/// Routes push events to a store without keeping it alive.
struct StoreHandler<E: Entity> {
    store: Weak<EntityStore<E>>,
}

impl<E: Entity> PushHandler<E> for StoreHandler<E> {
    fn on_create(&self, entity: E, origin: Origin) {
        if let Some(store) = self.store.upgrade() {
            store.apply_created(entity, origin);
        }
    }

    fn on_update(&self, entity: E, origin: Origin) {
        if let Some(store) = self.store.upgrade() {
            store.apply_updated(entity, origin);
        }
    }

    fn on_delete(&self, id: String) {
        if let Some(store) = self.store.upgrade() {
            store.apply_deleted(&id);
        }
    }
}

//! Write coalescing.
//!
//! Content edits are debounced per entity: each call to
//! [`WriteScheduler::schedule_debounced_write`] cancels the entity's previous
//! timer, folds the new patch into the pending payload and re-arms the quiet
//! period. When the timer fires the merged patch goes out as one remote update
//! and the entity's [`SyncState`] settles to `Synced` or `Error`. Failed writes
//! are not retried automatically.
//!
//! Structural operations (create, delete, rename) skip the queue and are
//! awaited by the caller; their errors propagate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{Collection, SyncState, SyncStatus};
use crate::remote::{merge_document, ClientId, Document, RemoteStore};
use crate::stats::SharedSyncStats;

/// Per-entity sync state, shared between the scheduler and the stores.
#[derive(Debug, Clone, Default)]
pub struct SyncStatusMap {
    inner: Arc<RwLock<HashMap<String, SyncState>>>,
}

impl SyncStatusMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<SyncState> {
        self.inner.read().get(id).cloned()
    }

    pub fn status(&self, id: &str) -> Option<SyncStatus> {
        self.inner.read().get(id).map(|s| s.status)
    }

    pub fn count(&self, status: SyncStatus) -> usize {
        self.inner
            .read()
            .values()
            .filter(|s| s.status == status)
            .count()
    }

    pub fn snapshot(&self) -> HashMap<String, SyncState> {
        self.inner.read().clone()
    }

    pub(crate) fn mark_syncing(&self, id: &str) {
        self.inner.write().insert(id.to_string(), SyncState::syncing());
    }

    /// Record an outcome, unless the entity stopped being tracked meanwhile.
    pub(crate) fn settle(&self, id: &str, state: SyncState) {
        if let Some(slot) = self.inner.write().get_mut(id) {
            *slot = state;
        }
    }

    pub(crate) fn remove(&self, id: &str) {
        self.inner.write().remove(id);
    }
}

/// A coalesced write: a field patch for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub collection: Collection,
    pub entity_id: String,
    pub payload: Document,
    pub scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImmediateOperation {
    Create {
        collection: Collection,
        id: Option<String>,
        payload: Document,
    },
    Delete {
        collection: Collection,
        id: String,
    },
    Rename {
        collection: Collection,
        id: String,
        patch: Document,
    },
}

impl ImmediateOperation {
    pub fn collection(&self) -> Collection {
        match self {
            ImmediateOperation::Create { collection, .. }
            | ImmediateOperation::Delete { collection, .. }
            | ImmediateOperation::Rename { collection, .. } => *collection,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Created(Document),
    Renamed(Document),
    Deleted,
}

struct PendingWrite {
    request: WriteRequest,
    generation: u64,
    timer: JoinHandle<()>,
}

struct SchedulerInner {
    remote: Arc<dyn RemoteStore>,
    client_id: ClientId,
    debounce: Duration,
    statuses: SyncStatusMap,
    stats: SharedSyncStats,
    pending: Mutex<HashMap<String, PendingWrite>>,
    /// Last request per entity whose write failed, kept for `retry`.
    failed: Mutex<HashMap<String, WriteRequest>>,
    in_flight: watch::Sender<usize>,
    generation: AtomicU64,
}

#[derive(Clone)]
pub struct WriteScheduler {
    inner: Arc<SchedulerInner>,
}

impl WriteScheduler {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        client_id: ClientId,
        debounce: Duration,
        stats: SharedSyncStats,
    ) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            inner: Arc::new(SchedulerInner {
                remote,
                client_id,
                debounce,
                statuses: SyncStatusMap::new(),
                stats,
                pending: Mutex::new(HashMap::new()),
                failed: Mutex::new(HashMap::new()),
                in_flight,
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.inner.remote
    }

    pub fn client_id(&self) -> &ClientId {
        &self.inner.client_id
    }

    pub fn statuses(&self) -> &SyncStatusMap {
        &self.inner.statuses
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn has_pending(&self, entity_id: &str) -> bool {
        self.inner.pending.lock().contains_key(entity_id)
    }

    /// Whether `entity_id` has local changes the remote store has not
    /// accepted: a queued write or a failed one awaiting retry.
    pub fn has_unsent(&self, entity_id: &str) -> bool {
        self.has_pending(entity_id) || self.inner.failed.lock().contains_key(entity_id)
    }

    /// Queue `request`, replacing any pending write for the same entity. A
    /// previously failed write for the entity is folded in underneath, so its
    /// fields are resent. Must be called inside a tokio runtime.
    pub fn schedule_debounced_write(&self, mut request: WriteRequest) {
        let id = request.entity_id.clone();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        self.inner.statuses.mark_syncing(&id);

        if let Some(failed) = self.inner.failed.lock().remove(&id) {
            let mut merged = failed.payload;
            merge_document(&mut merged, &request.payload);
            request.payload = merged;
            debug!("scheduler: folded failed write for {} into new edit", id);
        }

        // Hold the lock while arming so the timer cannot fire before its
        // entry exists.
        let mut pending = self.inner.pending.lock();
        if let Some(previous) = pending.remove(&id) {
            previous.timer.abort();
            let mut merged = previous.request.payload;
            merge_document(&mut merged, &request.payload);
            request.payload = merged;
            debug!("scheduler: coalesced write for {}", id);
        }

        let inner = Arc::clone(&self.inner);
        let delay = self.inner.debounce;
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire(&timer_id, generation).await;
        });

        pending.insert(
            id,
            PendingWrite {
                request,
                generation,
                timer,
            },
        );
    }

    /// Fold `patch` into the pending write for `entity_id`, if any, without
    /// re-arming its timer.
    pub fn amend_pending(&self, entity_id: &str, patch: &Document) -> bool {
        match self.inner.pending.lock().get_mut(entity_id) {
            Some(write) => {
                merge_document(&mut write.request.payload, patch);
                true
            }
            None => false,
        }
    }

    /// Drop the pending write for `entity_id` without executing it.
    pub fn cancel_pending_write(&self, entity_id: &str) -> bool {
        let cancelled = self.inner.pending.lock().remove(entity_id);
        self.inner.failed.lock().remove(entity_id);
        self.inner.statuses.remove(entity_id);
        match cancelled {
            Some(write) => {
                write.timer.abort();
                debug!("scheduler: cancelled pending write for {}", entity_id);
                true
            }
            None => false,
        }
    }

    /// Execute every pending write and resend every failed one now, in
    /// parallel, and wait for them and for any write already in flight.
    pub async fn flush_all(&self) {
        let mut drained: Vec<WriteRequest> = {
            let mut pending = self.inner.pending.lock();
            pending
                .drain()
                .map(|(_, write)| {
                    write.timer.abort();
                    write.request
                })
                .collect()
        };
        let failed: Vec<WriteRequest> = self.inner.failed.lock().drain().map(|(_, r)| r).collect();
        for request in &failed {
            self.inner.statuses.mark_syncing(&request.entity_id);
        }
        drained.extend(failed);

        if !drained.is_empty() {
            info!("scheduler: flushing {} pending writes", drained.len());
        }
        join_all(drained.into_iter().map(|request| self.inner.execute(request))).await;

        let mut in_flight = self.inner.in_flight.subscribe();
        let _ = in_flight.wait_for(|count| *count == 0).await;
    }

    /// Re-send the last failed write for `entity_id`. Returns false when
    /// there is nothing to retry.
    pub async fn retry(&self, entity_id: &str) -> bool {
        let Some(request) = self.inner.failed.lock().remove(entity_id) else {
            return false;
        };
        self.inner.statuses.mark_syncing(entity_id);
        self.inner.execute(request).await;
        true
    }

    /// Submit a structural operation directly, bypassing coalescing.
    pub async fn execute_immediate_operation(
        &self,
        operation: ImmediateOperation,
    ) -> Result<OperationOutcome> {
        let remote = &self.inner.remote;
        let origin = &self.inner.client_id;
        self.inner.stats.record_immediate(operation.collection());
        debug!("scheduler: immediate {:?}", operation);

        match operation {
            ImmediateOperation::Create {
                collection,
                id,
                payload,
            } => {
                let document = remote.create(collection, id.as_deref(), payload, origin).await?;
                Ok(OperationOutcome::Created(document))
            }
            ImmediateOperation::Delete { collection, id } => {
                // Held back until the delete is accepted; restored if it is not.
                let parked = self.park(&id);
                match remote.delete(collection, &id, origin).await {
                    Ok(()) => {
                        self.inner.statuses.remove(&id);
                        Ok(OperationOutcome::Deleted)
                    }
                    Err(e) => {
                        self.unpark(parked);
                        Err(e.into())
                    }
                }
            }
            ImmediateOperation::Rename {
                collection,
                id,
                patch,
            } => {
                // A queued content write must not resend the old fields.
                self.amend_pending(&id, &patch);
                let document = remote.update(collection, &id, patch, origin).await?;
                Ok(OperationOutcome::Renamed(document))
            }
        }
    }
}

impl WriteScheduler {
    fn park(&self, entity_id: &str) -> Parked {
        let queued = self.inner.pending.lock().remove(entity_id).map(|write| {
            write.timer.abort();
            write.request
        });
        let failed = self.inner.failed.lock().remove(entity_id);
        Parked { queued, failed }
    }

    fn unpark(&self, parked: Parked) {
        if let Some(request) = parked.failed {
            self.inner
                .failed
                .lock()
                .insert(request.entity_id.clone(), request);
        }
        // Re-arming folds the failed write back in and marks the entity syncing.
        if let Some(request) = parked.queued {
            self.schedule_debounced_write(request);
        }
    }
}

/// Unsent writes held aside while a delete is in flight.
struct Parked {
    queued: Option<WriteRequest>,
    failed: Option<WriteRequest>,
}

impl SchedulerInner {
    async fn fire(&self, id: &str, generation: u64) {
        let request = {
            let mut pending = self.pending.lock();
            if pending.get(id).map(|w| w.generation) != Some(generation) {
                return;
            }
            let Some(write) = pending.remove(id) else {
                return;
            };
            self.in_flight.send_modify(|count| *count += 1);
            write.request
        };

        self.execute(request).await;
        self.in_flight.send_modify(|count| *count -= 1);
    }

    async fn execute(&self, request: WriteRequest) {
        let id = request.entity_id.clone();
        self.stats.record_write(request.collection);

        let result = self
            .remote
            .update(
                request.collection,
                &id,
                request.payload.clone(),
                &self.client_id,
            )
            .await;

        // A newer write queued meanwhile owns the status now.
        if self.pending.lock().contains_key(&id) {
            return;
        }

        match result {
            Ok(_) => {
                debug!("scheduler: wrote {} {}", request.collection, id);
                self.statuses.settle(&id, SyncState::synced_at(Utc::now()));
            }
            Err(e) => {
                warn!("scheduler: write for {} {} failed: {}", request.collection, id, e);
                self.stats.record_write_failure(request.collection);
                self.statuses.settle(&id, SyncState::failed(e.to_string()));
                self.failed.lock().insert(id, request);
            }
        }
    }
}

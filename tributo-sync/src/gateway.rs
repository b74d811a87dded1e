//! Offline-aware CRUD for one entity type.
//!
//! Every operation asks the [`ConnectivityMonitor`] whether the entity's
//! endpoint answers. Online, the call goes to the backend and the cache is
//! updated with the server's answer. Offline, or when the remote call fails,
//! the cache is mutated directly and the change is appended to the pending
//! queue, to be replayed by [`EntityGateway::replay`].
//!
//! Operations on temporary (negative) ids always take the offline path: the
//! backend has never seen those records.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;
use tributo_core::{
    apply_patch, is_temporary_id, next_enqueued_at, next_temporary_id, now_millis,
    sort_for_replay, synthesize, ChangeKind, EntityError, EntityId, PendingChange, RemoteError,
    ReplayError, SyncEntity, SyncReport, TributoResult,
};
use tributo_storage::LocalStore;

use crate::monitor::ConnectivityMonitor;
use crate::remote::RemoteEntityApi;

/// Load, create, update and delete for entities of type `T`.
pub struct EntityGateway<T: SyncEntity> {
    monitor: Arc<ConnectivityMonitor>,
    remote: Arc<dyn RemoteEntityApi<T>>,
    store: LocalStore,
    // Serializes cache/queue read-modify-write across operations and replay.
    lock: Mutex<()>,
}

impl<T: SyncEntity> EntityGateway<T> {
    pub fn new(
        monitor: Arc<ConnectivityMonitor>,
        remote: Arc<dyn RemoteEntityApi<T>>,
        store: LocalStore,
    ) -> Self {
        Self {
            monitor,
            remote,
            store,
            lock: Mutex::new(()),
        }
    }

    pub fn entity_type(&self) -> &'static str {
        T::ENTITY_TYPE
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    fn endpoint_available(&self) -> bool {
        self.monitor.is_available(T::ENTITY_TYPE)
    }

    fn remote_failed(&self, operation: &'static str, err: &RemoteError) {
        tracing::warn!(
            entity_type = T::ENTITY_TYPE,
            operation,
            error = %err,
            "Remote call failed, falling back to local mirror"
        );
        self.monitor.mark_unavailable(T::ENTITY_TYPE, err.to_string());
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Current collection: from the backend when reachable, otherwise from
    /// the cache.
    ///
    /// A successful remote read replaces the cache. Changes still waiting
    /// for replay are laid over the server's list so they stay visible.
    pub async fn load(&self) -> TributoResult<Vec<T>> {
        let _guard = self.lock.lock().await;
        self.load_locked().await
    }

    pub(crate) async fn load_locked(&self) -> TributoResult<Vec<T>> {
        if self.endpoint_available() {
            match self.remote.list().await {
                Ok(items) => {
                    let queue = self.store.load_queue(T::ENTITY_TYPE)?;
                    let items = overlay_pending(items, &queue);
                    self.store.save_cache(&items)?;
                    tracing::debug!(
                        entity_type = T::ENTITY_TYPE,
                        count = items.len(),
                        "Cache refreshed from backend"
                    );
                    return Ok(items);
                }
                Err(e) => self.remote_failed("load", &e),
            }
        }
        self.cached()
    }

    /// The cached collection, without touching the network.
    pub fn cached(&self) -> TributoResult<Vec<T>> {
        Ok(self.store.load_cache::<T>()?.unwrap_or_default())
    }

    pub fn pending_count(&self) -> TributoResult<usize> {
        Ok(self.store.pending_count(T::ENTITY_TYPE)?)
    }

    /// Queued changes in replay order.
    pub fn pending_changes(&self) -> TributoResult<Vec<PendingChange>> {
        let mut queue = self.store.load_queue(T::ENTITY_TYPE)?;
        sort_for_replay(&mut queue);
        Ok(queue)
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Create a record. Offline, the returned record carries a temporary id.
    pub async fn create(&self, payload: serde_json::Value) -> TributoResult<T> {
        let _guard = self.lock.lock().await;

        if self.endpoint_available() {
            match self.remote.create(&payload).await {
                Ok(entity) => {
                    let mut cache = self.cached()?;
                    cache.push(entity.clone());
                    self.store.save_cache(&cache)?;
                    return Ok(entity);
                }
                Err(e) => self.remote_failed("create", &e),
            }
        }

        let mut cache = self.cached()?;
        let mut queue = self.store.load_queue(T::ENTITY_TYPE)?;
        let temporary_id = next_temporary_id(
            cache
                .iter()
                .map(|e| e.id())
                .chain(queue.iter().filter_map(|c| c.temporary_id.or(c.target_id))),
        );
        let entity: T = synthesize(temporary_id, &payload)?;

        let at = next_enqueued_at(&queue, now_millis());
        queue.push(PendingChange::create(temporary_id, payload, at));
        self.store.save_queue(T::ENTITY_TYPE, &queue)?;
        cache.push(entity.clone());
        self.store.save_cache(&cache)?;

        tracing::info!(
            entity_type = T::ENTITY_TYPE,
            temporary_id,
            pending = queue.len(),
            "Create queued for replay"
        );
        Ok(entity)
    }

    /// Apply `payload` to the record `id`.
    ///
    /// Offline, the record must be in the cache; otherwise the call fails
    /// with [`EntityError::NotFound`] and nothing is queued.
    pub async fn update(&self, id: EntityId, payload: serde_json::Value) -> TributoResult<T> {
        let _guard = self.lock.lock().await;

        if self.endpoint_available() && !is_temporary_id(id) {
            match self.remote.update(id, &payload).await {
                Ok(entity) => {
                    let mut cache = self.cached()?;
                    match cache.iter_mut().find(|e| e.id() == id) {
                        Some(slot) => *slot = entity.clone(),
                        None => cache.push(entity.clone()),
                    }
                    self.store.save_cache(&cache)?;
                    return Ok(entity);
                }
                Err(e) => self.remote_failed("update", &e),
            }
        }

        let mut cache = self.cached()?;
        let Some(slot) = cache.iter_mut().find(|e| e.id() == id) else {
            return Err(EntityError::NotFound {
                entity_type: T::ENTITY_TYPE.to_string(),
                id,
            }
            .into());
        };
        let patched: T = apply_patch(slot, &payload)?;
        *slot = patched.clone();

        let mut queue = self.store.load_queue(T::ENTITY_TYPE)?;
        let at = next_enqueued_at(&queue, now_millis());
        queue.push(PendingChange::update(id, payload, at));
        self.store.save_queue(T::ENTITY_TYPE, &queue)?;
        self.store.save_cache(&cache)?;

        tracing::info!(
            entity_type = T::ENTITY_TYPE,
            id,
            pending = queue.len(),
            "Update queued for replay"
        );
        Ok(patched)
    }

    /// Remove the record `id`.
    pub async fn delete(&self, id: EntityId) -> TributoResult<()> {
        let _guard = self.lock.lock().await;

        if self.endpoint_available() && !is_temporary_id(id) {
            match self.remote.delete(id).await {
                Ok(()) => {
                    let mut cache = self.cached()?;
                    cache.retain(|e| e.id() != id);
                    self.store.save_cache(&cache)?;
                    return Ok(());
                }
                Err(e) => self.remote_failed("delete", &e),
            }
        }

        let mut queue = self.store.load_queue(T::ENTITY_TYPE)?;
        let at = next_enqueued_at(&queue, now_millis());
        queue.push(PendingChange::delete(id, at));
        self.store.save_queue(T::ENTITY_TYPE, &queue)?;

        let mut cache = self.cached()?;
        cache.retain(|e| e.id() != id);
        self.store.save_cache(&cache)?;

        tracing::info!(
            entity_type = T::ENTITY_TYPE,
            id,
            pending = queue.len(),
            "Delete queued for replay"
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Replay
    // ------------------------------------------------------------------------

    /// Drain the pending queue against the backend, oldest change first.
    ///
    /// Successful entries are removed, failed ones are kept in order for the
    /// next pass. Temporary ids are rewritten to the server ids returned by
    /// replayed creates. The queue is written back after every successful
    /// entry, so an interrupted pass never resends what the backend already
    /// accepted. The cache is refreshed from the backend afterwards.
    /// Never fails: problems are logged and reflected in the report.
    pub async fn replay(&self) -> SyncReport {
        let _guard = self.lock.lock().await;

        let mut queue = match self.store.load_queue(T::ENTITY_TYPE) {
            Ok(queue) => queue,
            Err(e) => {
                tracing::error!(
                    entity_type = T::ENTITY_TYPE,
                    error = %e,
                    "Cannot read pending queue"
                );
                return SyncReport::default();
            }
        };
        sort_for_replay(&mut queue);

        let mut report = SyncReport::default();
        let mut id_map: HashMap<EntityId, EntityId> = HashMap::new();
        let mut retained = Vec::new();
        let mut remaining: VecDeque<PendingChange> = queue.into();

        while let Some(mut change) = remaining.pop_front() {
            remap_target(&mut change, &id_map);

            match self.replay_one(&change).await {
                Ok(created) => {
                    report.succeeded += 1;
                    if let (Some(entity), Some(temporary_id)) = (created, change.temporary_id) {
                        id_map.insert(temporary_id, entity.id());
                        self.swap_temporary(temporary_id, entity);
                    }
                    self.persist_progress(&retained, &remaining, &id_map);
                }
                Err(e) => {
                    tracing::warn!(
                        entity_type = T::ENTITY_TYPE,
                        error = %e,
                        "Replay failed, change retained"
                    );
                    report.failed += 1;
                    retained.push(change);
                }
            }
        }

        if let Err(e) = self.store.save_queue(T::ENTITY_TYPE, &retained) {
            tracing::error!(
                entity_type = T::ENTITY_TYPE,
                error = %e,
                "Cannot persist pending queue after replay"
            );
        }
        if let Err(e) = self.load_locked().await {
            tracing::warn!(entity_type = T::ENTITY_TYPE, error = %e, "Refresh after replay failed");
        }

        if report.attempted() > 0 {
            tracing::info!(
                entity_type = T::ENTITY_TYPE,
                succeeded = report.succeeded,
                failed = report.failed,
                "Replay pass finished"
            );
        }
        report
    }

    /// Write back what is left of a pass in progress: retained failures,
    /// then the entries not yet attempted with their targets remapped.
    fn persist_progress(
        &self,
        retained: &[PendingChange],
        remaining: &VecDeque<PendingChange>,
        id_map: &HashMap<EntityId, EntityId>,
    ) {
        let queue: Vec<PendingChange> = retained
            .iter()
            .cloned()
            .chain(remaining.iter().cloned().map(|mut change| {
                remap_target(&mut change, id_map);
                change
            }))
            .collect();
        if let Err(e) = self.store.save_queue(T::ENTITY_TYPE, &queue) {
            tracing::error!(
                entity_type = T::ENTITY_TYPE,
                error = %e,
                "Cannot persist replay progress"
            );
        }
    }

    /// Replay one change. A replayed create yields the server's record.
    async fn replay_one(&self, change: &PendingChange) -> Result<Option<T>, ReplayError> {
        let enqueued_at = change.enqueued_at;
        let remote = |source: RemoteError| ReplayError::Remote { enqueued_at, source };

        match change.kind {
            ChangeKind::Create => {
                if change.temporary_id.is_none() {
                    return Err(ReplayError::Malformed {
                        enqueued_at,
                        reason: "create without temporary id".to_string(),
                    });
                }
                let entity = self.remote.create(&change.payload).await.map_err(remote)?;
                Ok(Some(entity))
            }
            ChangeKind::Update => {
                let id = server_target(change)?;
                self.remote.update(id, &change.payload).await.map_err(remote)?;
                Ok(None)
            }
            ChangeKind::Delete => {
                let id = server_target(change)?;
                self.remote.delete(id).await.map_err(remote)?;
                Ok(None)
            }
        }
    }

    /// Put the server's record in place of its offline stand-in.
    fn swap_temporary(&self, temporary_id: EntityId, entity: T) {
        let result = self.cached().and_then(|mut cache| {
            if let Some(slot) = cache.iter_mut().find(|e| e.id() == temporary_id) {
                *slot = entity;
                self.store.save_cache(&cache)?;
            }
            Ok(())
        });
        if let Err(e) = result {
            tracing::warn!(
                entity_type = T::ENTITY_TYPE,
                temporary_id,
                error = %e,
                "Cannot update cached entity after replay"
            );
        }
    }
}

fn remap_target(change: &mut PendingChange, id_map: &HashMap<EntityId, EntityId>) {
    if let Some(server_id) = change.target_id.and_then(|t| id_map.get(&t).copied()) {
        change.target_id = Some(server_id);
    }
}

fn server_target(change: &PendingChange) -> Result<EntityId, ReplayError> {
    match change.target_id {
        None => Err(ReplayError::Malformed {
            enqueued_at: change.enqueued_at,
            reason: format!("{:?} without target id", change.kind),
        }),
        Some(id) if is_temporary_id(id) => Err(ReplayError::UnresolvedTemporaryId {
            enqueued_at: change.enqueued_at,
            temporary_id: id,
        }),
        Some(id) => Ok(id),
    }
}

/// Lay still-queued changes over a fresh server list.
fn overlay_pending<T: SyncEntity>(mut items: Vec<T>, queue: &[PendingChange]) -> Vec<T> {
    let mut queue = queue.to_vec();
    sort_for_replay(&mut queue);

    for change in &queue {
        match (change.kind, change.temporary_id, change.target_id) {
            (ChangeKind::Create, Some(temporary_id), _) => {
                if items.iter().any(|e| e.id() == temporary_id) {
                    continue;
                }
                match synthesize::<T>(temporary_id, &change.payload) {
                    Ok(entity) => items.push(entity),
                    Err(e) => tracing::debug!(error = %e, "Skipping unrenderable queued create"),
                }
            }
            (ChangeKind::Update, _, Some(id)) => {
                if let Some(slot) = items.iter_mut().find(|e| e.id() == id) {
                    match apply_patch(slot, &change.payload) {
                        Ok(patched) => *slot = patched,
                        Err(e) => tracing::debug!(
                            error = %e,
                            "Skipping unrenderable queued update"
                        ),
                    }
                }
            }
            (ChangeKind::Delete, _, Some(id)) => items.retain(|e| e.id() != id),
            _ => {}
        }
    }
    items
}

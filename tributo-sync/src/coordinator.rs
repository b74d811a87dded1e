//! Replays queued changes when endpoints come back.
//!
//! The coordinator keeps one [`Replayable`] per entity type and listens to
//! the [`ConnectivityMonitor`]. A transition to available for an endpoint
//! with pending changes starts a replay pass for that entity type. Passes for
//! the same entity type never overlap.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use futures_util::future::join_all;
use tributo_core::{SyncEntity, SyncReport};

use crate::gateway::EntityGateway;
use crate::monitor::{ConnectivityMonitor, Subscription};

/// A queue the coordinator can drain.
#[async_trait]
pub trait Replayable: Send + Sync {
    fn entity_type(&self) -> &'static str;

    /// Pending changes, zero when the queue cannot be read.
    fn pending_count(&self) -> usize;

    async fn replay(&self) -> SyncReport;
}

#[async_trait]
impl<T: SyncEntity> Replayable for EntityGateway<T> {
    fn entity_type(&self) -> &'static str {
        T::ENTITY_TYPE
    }

    fn pending_count(&self) -> usize {
        EntityGateway::pending_count(self).unwrap_or_else(|e| {
            tracing::warn!(entity_type = T::ENTITY_TYPE, error = %e, "Cannot read pending count");
            0
        })
    }

    async fn replay(&self) -> SyncReport {
        EntityGateway::replay(self).await
    }
}

struct Registered {
    gateway: Arc<dyn Replayable>,
    running: Arc<AtomicBool>,
}

/// Clears the per-entity running flag when a pass ends.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives replay passes for every registered entity type.
pub struct SyncCoordinator {
    monitor: Arc<ConnectivityMonitor>,
    gateways: RwLock<BTreeMap<&'static str, Registered>>,
    subscription: Mutex<Option<Subscription>>,
}

impl SyncCoordinator {
    pub fn new(monitor: Arc<ConnectivityMonitor>) -> Arc<Self> {
        Arc::new(Self {
            monitor,
            gateways: RwLock::new(BTreeMap::new()),
            subscription: Mutex::new(None),
        })
    }

    /// Add a gateway. A later registration for the same entity type replaces
    /// the earlier one.
    pub fn register(&self, gateway: Arc<dyn Replayable>) {
        let entity_type = gateway.entity_type();
        let previous = self
            .gateways
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                entity_type,
                Registered {
                    gateway,
                    running: Arc::new(AtomicBool::new(false)),
                },
            );
        if previous.is_some() {
            tracing::warn!(entity_type, "Replacing registered gateway");
        }
    }

    /// Registered entity types, ordered by name.
    pub fn entity_types(&self) -> Vec<&'static str> {
        self.gateways
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Pending changes for `entity_type`, `None` when it is not registered.
    pub fn pending_count(&self, entity_type: &str) -> Option<usize> {
        let gateway = self.lookup(entity_type)?.0;
        Some(gateway.pending_count())
    }

    fn lookup(&self, entity_type: &str) -> Option<(Arc<dyn Replayable>, Arc<AtomicBool>)> {
        self.gateways
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_type)
            .map(|r| (Arc::clone(&r.gateway), Arc::clone(&r.running)))
    }

    /// Run one replay pass for `entity_type` now.
    ///
    /// Returns `None` for an unregistered type, and a report with `skipped`
    /// set when a pass for the same type is already running.
    pub async fn sync_now(&self, entity_type: &str) -> Option<SyncReport> {
        let (gateway, running) = self.lookup(entity_type)?;
        if running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(entity_type, "Replay already running, skipping");
            return Some(SyncReport::skipped());
        }
        let _running = RunningGuard(running);

        tracing::debug!(entity_type, pending = gateway.pending_count(), "Starting replay pass");
        Some(gateway.replay().await)
    }

    /// Run a pass for every registered entity type.
    pub async fn sync_all(&self) -> BTreeMap<&'static str, SyncReport> {
        let types = self.entity_types();
        let reports = join_all(types.iter().map(|t| self.sync_now(t))).await;
        types
            .into_iter()
            .zip(reports)
            .filter_map(|(t, report)| report.map(|r| (t, r)))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Monitor wiring
    // ------------------------------------------------------------------------

    /// Subscribe to the monitor. Endpoints that are already available with
    /// pending changes are drained right away; afterwards every transition
    /// to available triggers a pass for that entity type.
    ///
    /// Passes are spawned on the current tokio runtime.
    pub fn attach(self: &Arc<Self>) {
        let mut slot = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            tracing::warn!("Sync coordinator already attached");
            return;
        }

        let coordinator = Arc::downgrade(self);
        let subscription = self.monitor.subscribe(move |online, changed| {
            on_transition(&coordinator, online, changed);
        });
        *slot = Some(subscription);
    }

    /// Stop reacting to connectivity transitions.
    pub fn detach(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(subscription);
    }

    pub fn is_attached(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Entity types whose endpoint is up and whose queue is not empty.
    fn due(&self, changed: Option<&str>) -> Vec<&'static str> {
        let gateways = self.gateways.read().unwrap_or_else(PoisonError::into_inner);
        gateways
            .iter()
            .filter(|(name, _)| changed.map_or(true, |c| c == **name))
            .filter(|(name, _)| self.monitor.is_available(name))
            .filter(|(_, r)| r.gateway.pending_count() > 0)
            .map(|(name, _)| *name)
            .collect()
    }
}

fn on_transition(coordinator: &Weak<SyncCoordinator>, online: bool, changed: Option<&str>) {
    if !online {
        return;
    }
    let Some(coordinator) = coordinator.upgrade() else {
        return;
    };
    let due = coordinator.due(changed);
    if due.is_empty() {
        return;
    }

    let handle = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(error = %e, "No runtime available, replay deferred");
            return;
        }
    };
    for entity_type in due {
        let coordinator = Arc::clone(&coordinator);
        handle.spawn(async move {
            if let Some(report) = coordinator.sync_now(entity_type).await {
                tracing::debug!(
                    entity_type,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    skipped = report.skipped,
                    "Replay triggered by connectivity"
                );
            }
        });
    }
}

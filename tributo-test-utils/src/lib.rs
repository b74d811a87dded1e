//! TRIBUTO Test Utilities
//!
//! Shared test infrastructure for the TRIBUTO workspace:
//! - Re-exported mocks from their source crates
//! - A wired harness (monitor, mock backend, store, gateway, coordinator)
//! - Proptest generators for entities, payloads and offline operation
//!   sequences

use std::sync::Arc;
use std::time::{Duration, Instant};

use proptest::prelude::*;
use serde_json::{json, Value};

// Re-export mocks from their source crates
pub use tributo_storage::{InMemoryStore, LocalStore};
pub use tributo_sync::{MockRemote, RemoteCall, ScriptedProber};

// Re-export core types for convenience
pub use tributo_core::{
    ChangeKind, EntityId, PendingChange, ProbeTarget, Sector, Street, SyncEntity, SyncReport,
    TributoError, TributoResult,
};
pub use tributo_sync::{ConnectivityMonitor, EntityGateway, MonitorConfig, SyncCoordinator};

// ============================================================================
// FIXTURES
// ============================================================================

pub fn sector(id: EntityId, nombre: &str) -> Sector {
    Sector {
        id,
        nombre: nombre.to_string(),
        descripcion: None,
    }
}

pub fn street(id: EntityId, nombre: &str, sector_id: Option<EntityId>) -> Street {
    Street {
        id,
        nombre: nombre.to_string(),
        sector_id,
    }
}

/// Everything needed to drive one entity type through offline and online
/// phases against an in-memory backend.
pub struct Harness<T: SyncEntity> {
    pub prober: Arc<ScriptedProber>,
    pub monitor: Arc<ConnectivityMonitor>,
    pub remote: Arc<MockRemote<T>>,
    pub raw_store: InMemoryStore,
    pub store: LocalStore,
    pub gateway: Arc<EntityGateway<T>>,
    pub coordinator: Arc<SyncCoordinator>,
}

impl<T: SyncEntity> Harness<T> {
    /// Harness over `raw_store` (reuse one to simulate a restart), with the
    /// backend handing out ids from `first_server_id`.
    pub fn with_store(raw_store: InMemoryStore, first_server_id: EntityId) -> Self {
        let prober = Arc::new(ScriptedProber::new(false));
        let monitor = ConnectivityMonitor::new(prober.clone(), MonitorConfig::default());
        monitor.register(
            T::ENTITY_TYPE,
            ProbeTarget::new(ScriptedProber::url_for(T::ENTITY_TYPE)),
        );

        let remote = Arc::new(MockRemote::<T>::starting_at(first_server_id));
        let store = LocalStore::new(raw_store.clone());
        let gateway = Arc::new(EntityGateway::new(
            Arc::clone(&monitor),
            remote.clone(),
            store.clone(),
        ));
        let coordinator = SyncCoordinator::new(Arc::clone(&monitor));
        coordinator.register(gateway.clone());

        Self {
            prober,
            monitor,
            remote,
            raw_store,
            store,
            gateway,
            coordinator,
        }
    }

    /// Endpoint probed and found unreachable; backend refuses calls.
    pub async fn offline() -> Self {
        let harness = Self::with_store(InMemoryStore::new(), 1);
        harness.go_offline().await;
        harness
    }

    /// Endpoint probed and found reachable.
    pub async fn online() -> Self {
        let harness = Self::with_store(InMemoryStore::new(), 1);
        harness.go_online().await;
        harness
    }

    pub fn probe_url(&self) -> String {
        ScriptedProber::url_for(T::ENTITY_TYPE)
    }

    /// Bring the backend up and probe. Returns the endpoint's availability.
    pub async fn go_online(&self) -> bool {
        self.remote.set_offline(false);
        self.prober.set_reachable(self.probe_url(), true);
        self.monitor.force_check(Some(T::ENTITY_TYPE)).await
    }

    /// Take the backend down and probe. Returns the endpoint's availability.
    pub async fn go_offline(&self) -> bool {
        self.remote.set_offline(true);
        self.prober.set_reachable(self.probe_url(), false);
        self.monitor.force_check(Some(T::ENTITY_TYPE)).await
    }

    pub fn pending(&self) -> usize {
        self.gateway.pending_count().unwrap_or(0)
    }

    /// Poll until the pending queue holds `expected` changes.
    pub async fn wait_for_pending(&self, expected: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.pending() == expected {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

// ============================================================================
// OFFLINE OPERATION SEQUENCES
// ============================================================================

/// A gateway call made while offline.
///
/// `Update` and `Delete` address the `index`-th cached record (modulo the
/// cache length) at the time they run, and are skipped on an empty cache.
#[derive(Debug, Clone)]
pub enum OfflineOp {
    Create(Value),
    Update { index: usize, payload: Value },
    Delete { index: usize },
}

/// Run `ops` through `gateway`, returning how many calls were made.
pub async fn apply_ops<T: SyncEntity>(
    gateway: &EntityGateway<T>,
    ops: &[OfflineOp],
) -> TributoResult<usize> {
    let mut applied = 0;
    for op in ops {
        match op {
            OfflineOp::Create(payload) => {
                gateway.create(payload.clone()).await?;
            }
            OfflineOp::Update { index, payload } => {
                let cache = gateway.cached()?;
                if cache.is_empty() {
                    continue;
                }
                let id = cache[index % cache.len()].id();
                gateway.update(id, payload.clone()).await?;
            }
            OfflineOp::Delete { index } => {
                let cache = gateway.cached()?;
                if cache.is_empty() {
                    continue;
                }
                let id = cache[index % cache.len()].id();
                gateway.delete(id).await?;
            }
        }
        applied += 1;
    }
    Ok(applied)
}

// ============================================================================
// GENERATORS
// ============================================================================

pub fn arb_nombre() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{2,10}( [A-Z][a-z]{2,8})?"
}

pub fn arb_sector_payload() -> impl Strategy<Value = Value> {
    (arb_nombre(), proptest::option::of("[a-z ]{0,20}")).prop_map(|(nombre, descripcion)| {
        match descripcion {
            Some(d) => json!({"nombre": nombre, "descripcion": d}),
            None => json!({"nombre": nombre}),
        }
    })
}

pub fn arb_sector() -> impl Strategy<Value = Sector> {
    (1i64..10_000, arb_nombre()).prop_map(|(id, nombre)| sector(id, &nombre))
}

pub fn arb_offline_op() -> impl Strategy<Value = OfflineOp> {
    prop_oneof![
        3 => arb_sector_payload().prop_map(OfflineOp::Create),
        2 => (any::<usize>(), arb_sector_payload())
            .prop_map(|(index, payload)| OfflineOp::Update { index, payload }),
        1 => any::<usize>().prop_map(|index| OfflineOp::Delete { index }),
    ]
}

pub fn arb_offline_ops(max_len: usize) -> impl Strategy<Value = Vec<OfflineOp>> {
    proptest::collection::vec(arb_offline_op(), 0..max_len)
}

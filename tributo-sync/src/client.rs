//! Wiring of the offline layer from a [`SyncConfig`].

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tributo_core::{ProbeTarget, SyncEntity, TributoError};
use tributo_storage::{LmdbStore, LocalStore};

use crate::config::SyncConfig;
use crate::coordinator::SyncCoordinator;
use crate::error::{SyncError, SyncResult};
use crate::gateway::EntityGateway;
use crate::monitor::ConnectivityMonitor;
use crate::probe::HttpProber;
use crate::remote::RestEntityApi;

type AnyGateway = Arc<dyn Any + Send + Sync>;

/// Monitor, coordinator, store and gateways for one process.
///
/// ```ignore
/// let runtime = OfflineRuntime::from_config(SyncConfig::load()?)?;
/// let sectors = runtime.gateway::<Sector>()?;
/// runtime.start();
/// let list = sectors.load().await?;
/// ```
pub struct OfflineRuntime {
    config: SyncConfig,
    http: reqwest::Client,
    monitor: Arc<ConnectivityMonitor>,
    coordinator: Arc<SyncCoordinator>,
    store: LocalStore,
    gateways: Mutex<HashMap<&'static str, AnyGateway>>,
}

impl OfflineRuntime {
    /// Validate `config` and open the LMDB mirror at `store_path`.
    pub fn from_config(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let store = LmdbStore::open(&config.store_path, config.store_max_size_mb)?;
        Self::with_store(config, LocalStore::new(store))
    }

    /// Build over an existing mirror.
    pub fn with_store(config: SyncConfig, store: LocalStore) -> SyncResult<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let prober = HttpProber::new(config.probe_timeout())?;
        let monitor = ConnectivityMonitor::new(Arc::new(prober), config.monitor_config());

        for endpoint in &config.endpoints {
            let url = config.endpoint_url(endpoint);
            let target = if endpoint.requires_auth {
                ProbeTarget::authenticated(url)
            } else {
                ProbeTarget::new(url)
            };
            monitor.register(endpoint.name.clone(), target);
        }
        monitor.set_credential(config.auth.bearer_token.clone());

        let coordinator = SyncCoordinator::new(Arc::clone(&monitor));
        Ok(Self {
            config,
            http,
            monitor,
            coordinator,
            store,
            gateways: Mutex::new(HashMap::new()),
        })
    }

    /// The gateway for `T`, built on first use and shared afterwards.
    ///
    /// `T::ENTITY_TYPE` must name a configured endpoint.
    pub fn gateway<T: SyncEntity>(&self) -> SyncResult<Arc<EntityGateway<T>>> {
        let mut gateways = self.gateways.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = gateways.get(T::ENTITY_TYPE) {
            if let Ok(gateway) = Arc::clone(existing).downcast::<EntityGateway<T>>() {
                return Ok(gateway);
            }
        }

        let endpoint = self
            .config
            .endpoint(T::ENTITY_TYPE)
            .ok_or_else(|| SyncError::UnknownEndpoint(T::ENTITY_TYPE.to_string()))?;
        let remote = RestEntityApi::<T>::new(
            self.http.clone(),
            &self.config.api_base_url,
            &endpoint.path,
            self.config.auth.bearer_token.as_deref(),
        )
        .map_err(TributoError::from)?;

        let gateway = Arc::new(EntityGateway::new(
            Arc::clone(&self.monitor),
            Arc::new(remote),
            self.store.clone(),
        ));
        self.coordinator.register(gateway.clone());
        gateways.insert(T::ENTITY_TYPE, gateway.clone());
        tracing::debug!(
            entity_type = T::ENTITY_TYPE,
            url = %self.config.endpoint_url(endpoint),
            "Gateway created"
        );
        Ok(gateway)
    }

    /// Attach the coordinator and start polling. Must run inside a tokio
    /// runtime.
    pub fn start(&self) {
        self.coordinator.attach();
        self.monitor.start();
    }

    pub async fn stop(&self) {
        self.monitor.stop().await;
        self.coordinator.detach();
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }
}

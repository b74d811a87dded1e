//! Per-endpoint connectivity monitor.
//!
//! The monitor owns a registry of named endpoints and their last known
//! [`ConnectivityRecord`]. Records change only through probe outcomes, the
//! browser-level network signal, and in-flight failures reported by gateways.
//! Every transition is pushed to subscribed listeners.
//!
//! Two signals are kept apart on purpose: [`ConnectivityMonitor::network_online`]
//! is the coarse process-wide signal, while each record says whether its own
//! endpoint answers. An endpoint can be down while the network is up.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tributo_core::{ConnectivityRecord, ProbeTarget};

use crate::probe::Prober;

/// Default period of the polling timer.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Monitor tuning.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Period of the background polling cycle.
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl MonitorConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Listener callback: `(overall_online, changed_endpoint)`.
///
/// `changed_endpoint` is `None` only for the call made at subscription time.
pub type Listener = Arc<dyn Fn(bool, Option<&str>) + Send + Sync>;

#[derive(Default)]
struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

impl ListenerRegistry {
    fn listeners(&self) -> MutexGuard<'_, Vec<(u64, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, listener: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners().push((id, listener));
        id
    }

    fn remove(&self, id: u64) {
        self.listeners().retain(|(existing, _)| *existing != id);
    }

    fn snapshot(&self) -> Vec<Listener> {
        self.listeners().iter().map(|(_, l)| Arc::clone(l)).collect()
    }
}

/// Handle returned by [`ConnectivityMonitor::subscribe`].
///
/// The listener stays registered until the handle is dropped or
/// [`Subscription::unsubscribe`] is called.
#[must_use = "dropping the subscription unsubscribes the listener"]
pub struct Subscription {
    registry: Weak<ListenerRegistry>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

struct Endpoint {
    target: ProbeTarget,
    record: ConnectivityRecord,
    probing: bool,
    // Woken when an in-flight probe finishes.
    probed: Arc<Notify>,
}

struct PollTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Tracks reachability of named backend endpoints.
///
/// Construct one per process, share it as `Arc<ConnectivityMonitor>`, and
/// drive its lifecycle with [`start`](Self::start) and [`stop`](Self::stop).
pub struct ConnectivityMonitor {
    prober: Arc<dyn Prober>,
    config: MonitorConfig,
    endpoints: RwLock<BTreeMap<String, Endpoint>>,
    registry: Arc<ListenerRegistry>,
    credential: RwLock<Option<String>>,
    network_online: AtomicBool,
    last_cycle_started: Mutex<Option<Instant>>,
    task: Mutex<Option<PollTask>>,
}

/// Clears the per-endpoint in-flight flag and wakes waiters, even if the
/// probe future is dropped.
struct ProbeGuard<'a> {
    monitor: &'a ConnectivityMonitor,
    name: &'a str,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        let probed = self.monitor.endpoints_mut().get_mut(self.name).map(|endpoint| {
            endpoint.probing = false;
            Arc::clone(&endpoint.probed)
        });
        if let Some(probed) = probed {
            probed.notify_waiters();
        }
    }
}

impl ConnectivityMonitor {
    pub fn new(prober: Arc<dyn Prober>, config: MonitorConfig) -> Arc<Self> {
        Arc::new(Self {
            prober,
            config,
            endpoints: RwLock::new(BTreeMap::new()),
            registry: Arc::new(ListenerRegistry::default()),
            credential: RwLock::new(None),
            network_online: AtomicBool::new(true),
            last_cycle_started: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    fn endpoints(&self) -> RwLockReadGuard<'_, BTreeMap<String, Endpoint>> {
        self.endpoints.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn endpoints_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Endpoint>> {
        self.endpoints.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------------

    /// Add an endpoint to the polling set. Registering a known name is a no-op.
    ///
    /// Returns `true` when the endpoint was newly added.
    pub fn register(&self, name: impl Into<String>, target: ProbeTarget) -> bool {
        let name = name.into();
        let mut endpoints = self.endpoints_mut();
        if endpoints.contains_key(&name) {
            tracing::debug!(endpoint = %name, "Endpoint already registered");
            return false;
        }
        tracing::info!(
            endpoint = %name,
            url = %target.url,
            requires_auth = target.requires_auth,
            "Endpoint registered"
        );
        endpoints.insert(
            name.clone(),
            Endpoint {
                target,
                record: ConnectivityRecord::new(name),
                probing: false,
                probed: Arc::new(Notify::new()),
            },
        );
        true
    }

    pub fn status(&self, name: &str) -> Option<ConnectivityRecord> {
        self.endpoints().get(name).map(|e| e.record.clone())
    }

    /// Snapshot of every registered endpoint, ordered by name.
    pub fn endpoints_status(&self) -> Vec<ConnectivityRecord> {
        self.endpoints().values().map(|e| e.record.clone()).collect()
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.endpoints()
            .get(name)
            .is_some_and(|e| e.record.available())
    }

    /// Online if any endpoint answers.
    pub fn is_online(&self) -> bool {
        self.endpoints().values().any(|e| e.record.available())
    }

    /// Last browser-level network signal.
    pub fn network_online(&self) -> bool {
        self.network_online.load(Ordering::SeqCst)
    }

    /// Credential used for the authenticated follow-up probe.
    pub fn set_credential(&self, credential: Option<String>) {
        *self.credential.write().unwrap_or_else(PoisonError::into_inner) = credential;
    }

    fn credential(&self) -> Option<String> {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ------------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------------

    /// Register a transition listener. It is called once right away with the
    /// current overall state.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(bool, Option<&str>) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let id = self.registry.add(Arc::clone(&listener));
        listener(self.is_online(), None);
        Subscription {
            registry: Arc::downgrade(&self.registry),
            id,
        }
    }

    fn notify(&self, changed: &str) {
        let online = self.is_online();
        for listener in self.registry.snapshot() {
            listener(online, Some(changed));
        }
    }

    // ------------------------------------------------------------------------
    // Checks
    // ------------------------------------------------------------------------

    /// Probe now. With a name, probe that endpoint and return its
    /// availability; without, probe every endpoint concurrently and return
    /// whether any answered. A request for an endpoint already being probed
    /// waits for that probe and reports its result.
    pub async fn force_check(&self, name: Option<&str>) -> bool {
        match name {
            Some(name) => self.probe_endpoint(name).await,
            None => self.check_all().await,
        }
    }

    async fn check_all(&self) -> bool {
        *self
            .last_cycle_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        let names: Vec<String> = self.endpoints().keys().cloned().collect();
        join_all(names.iter().map(|name| self.probe_endpoint(name))).await;
        self.is_online()
    }

    /// One polling cycle. Skipped when the previous cycle started less than
    /// half an interval ago.
    ///
    /// Returns `false` when the cycle was skipped.
    pub async fn run_cycle(&self) -> bool {
        let min_gap = self.config.poll_interval / 2;
        let recent = self
            .last_cycle_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|started| started.elapsed() < min_gap);
        if recent {
            tracing::debug!("Skipping connectivity cycle, previous one is too recent");
            return false;
        }
        self.check_all().await;
        true
    }

    async fn probe_endpoint(&self, name: &str) -> bool {
        let claimed = {
            let mut endpoints = self.endpoints_mut();
            match endpoints.get_mut(name) {
                None => None,
                Some(endpoint) if endpoint.probing => Some(Err(Arc::clone(&endpoint.probed))),
                Some(endpoint) => {
                    endpoint.probing = true;
                    Some(Ok(endpoint.target.clone()))
                }
            }
        };
        let target = match claimed {
            None => {
                tracing::warn!(endpoint = name, "Check requested for unregistered endpoint");
                return false;
            }
            // Already in flight: share its result instead of probing twice.
            Some(Err(probed)) => return self.await_in_flight(name, &probed).await,
            Some(Ok(target)) => target,
        };
        let _guard = ProbeGuard {
            monitor: self,
            name,
        };

        let mut outcome = self.prober.check(&target).await;
        if outcome.available && target.requires_auth {
            if let Some(credential) = self.credential() {
                let authenticated = self.prober.check_authenticated(&target, &credential).await;
                outcome = outcome.with_authenticated(authenticated);
            }
        }

        let (changed, available) = {
            let mut endpoints = self.endpoints_mut();
            match endpoints.get_mut(name) {
                Some(endpoint) => {
                    let changed = endpoint.record.apply_probe(&outcome, Utc::now());
                    (changed, endpoint.record.available())
                }
                None => return false,
            }
        };

        if changed {
            if available {
                tracing::info!(
                    endpoint = name,
                    response_time_ms = ?outcome.response_time_ms,
                    "Endpoint available"
                );
            } else {
                tracing::warn!(endpoint = name, error = ?outcome.error, "Endpoint unavailable");
            }
            self.notify(name);
        }
        available
    }

    /// Wait for the probe running on `name` and report its result.
    async fn await_in_flight(&self, name: &str, probed: &Notify) -> bool {
        loop {
            let notified = probed.notified();
            let state = self
                .endpoints()
                .get(name)
                .map(|e| (e.probing, e.record.available()));
            match state {
                Some((true, _)) => notified.await,
                Some((false, available)) => return available,
                None => return false,
            }
        }
    }

    /// Record an in-flight failure so callers skip the remote path until the
    /// next successful probe.
    pub fn mark_unavailable(&self, name: &str, reason: impl Into<String>) {
        let changed = self
            .endpoints_mut()
            .get_mut(name)
            .is_some_and(|e| e.record.mark_unavailable(reason, Utc::now()));
        if changed {
            tracing::warn!(endpoint = name, "Endpoint marked unavailable after failed call");
            self.notify(name);
        }
    }

    /// Apply the browser-level network signal.
    ///
    /// Going offline marks every endpoint unavailable without probing; coming
    /// back online triggers an immediate check of all endpoints.
    pub async fn set_network_online(&self, online: bool) {
        self.network_online.store(online, Ordering::SeqCst);
        if online {
            tracing::info!("Network online, checking endpoints");
            self.check_all().await;
            return;
        }

        tracing::warn!("Network offline, marking all endpoints unavailable");
        let changed: Vec<String> = {
            let now = Utc::now();
            let mut endpoints = self.endpoints_mut();
            endpoints
                .iter_mut()
                .filter_map(|(name, e)| {
                    e.record
                        .mark_unavailable("network offline", now)
                        .then(|| name.clone())
                })
                .collect()
        };
        for name in changed {
            self.notify(&name);
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Start the background polling task. The first cycle runs immediately.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            tracing::warn!("Connectivity monitor already started");
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let monitor = Arc::downgrade(self);
        let period = self.config.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                poll_interval_ms = period.as_millis() as u64,
                "Connectivity monitor started"
            );

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let Some(monitor) = monitor.upgrade() else {
                            break;
                        };
                        monitor.run_cycle().await;
                    }
                }
            }

            tracing::info!("Connectivity monitor stopped");
        });

        *task = Some(PollTask { shutdown, handle });
    }

    /// Stop the polling task and wait for it to finish.
    pub async fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            if let Err(e) = task.handle.await {
                tracing::error!(error = %e, "Connectivity monitor task failed");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = task.shutdown.send(true);
        }
    }
}

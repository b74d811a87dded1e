//! In-memory backends for testing the offline layer.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tributo_core::{
    apply_patch, synthesize, EntityId, ProbeError, ProbeOutcome, ProbeTarget, RemoteError,
    SyncEntity,
};

use crate::probe::Prober;
use crate::remote::RemoteEntityApi;

/// A call received by [`MockRemote`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    List,
    Create(Value),
    Update(EntityId, Value),
    Delete(EntityId),
}

impl RemoteCall {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, RemoteCall::List)
    }
}

struct RemoteState<T> {
    records: BTreeMap<EntityId, T>,
    next_id: EntityId,
    offline: bool,
    failing: BTreeSet<usize>,
    stalling: BTreeSet<usize>,
    mutations: usize,
    calls: Vec<RemoteCall>,
}

/// Backend that keeps records in memory and assigns increasing ids.
pub struct MockRemote<T> {
    state: Mutex<RemoteState<T>>,
}

impl<T: SyncEntity> Default for MockRemote<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SyncEntity> MockRemote<T> {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Ids handed out by `create` start at `first_id`.
    pub fn starting_at(first_id: EntityId) -> Self {
        Self {
            state: Mutex::new(RemoteState {
                records: BTreeMap::new(),
                next_id: first_id,
                offline: false,
                failing: BTreeSet::new(),
                stalling: BTreeSet::new(),
                mutations: 0,
                calls: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RemoteState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store records as if they had been created server-side.
    pub fn seed(&self, records: impl IntoIterator<Item = T>) {
        let mut state = self.state();
        for record in records {
            state.next_id = state.next_id.max(record.id() + 1);
            state.records.insert(record.id(), record);
        }
    }

    /// While offline every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Make the `n`-th mutating call (1-based, counted from construction)
    /// fail with HTTP 500.
    pub fn fail_mutation(&self, n: usize) {
        self.state().failing.insert(n);
    }

    /// Make the `n`-th mutating call never answer. The call is recorded but
    /// changes nothing.
    pub fn stall_mutation(&self, n: usize) {
        self.state().stalling.insert(n);
    }

    pub fn records(&self) -> Vec<T> {
        self.state().records.values().cloned().collect()
    }

    pub fn record(&self, id: EntityId) -> Option<T> {
        self.state().records.get(&id).cloned()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    pub fn mutation_calls(&self) -> Vec<RemoteCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Log `call` and decide whether it fails before touching records.
    /// Returns `true` when the call must hang.
    fn admit(state: &mut RemoteState<T>, call: RemoteCall) -> Result<bool, RemoteError> {
        let mutation = call.is_mutation();
        state.calls.push(call);
        if state.offline {
            return Err(RemoteError::Transport {
                endpoint: T::ENTITY_TYPE.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        if mutation {
            state.mutations += 1;
            if state.failing.contains(&state.mutations) {
                return Err(RemoteError::Status {
                    endpoint: T::ENTITY_TYPE.to_string(),
                    status: 500,
                    body: "scripted failure".to_string(),
                });
            }
            return Ok(state.stalling.contains(&state.mutations));
        }
        Ok(false)
    }

    async fn enter(&self, call: RemoteCall) -> Result<(), RemoteError> {
        let stalled = Self::admit(&mut self.state(), call)?;
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

fn not_found<T: SyncEntity>(id: EntityId) -> RemoteError {
    RemoteError::Status {
        endpoint: T::ENTITY_TYPE.to_string(),
        status: 404,
        body: format!("{} {} not found", T::ENTITY_TYPE, id),
    }
}

fn bad_request<T: SyncEntity>(reason: String) -> RemoteError {
    RemoteError::Status {
        endpoint: T::ENTITY_TYPE.to_string(),
        status: 400,
        body: reason,
    }
}

#[async_trait]
impl<T: SyncEntity> RemoteEntityApi<T> for MockRemote<T> {
    async fn list(&self) -> Result<Vec<T>, RemoteError> {
        let mut state = self.state();
        Self::admit(&mut state, RemoteCall::List)?;
        Ok(state.records.values().cloned().collect())
    }

    async fn create(&self, payload: &Value) -> Result<T, RemoteError> {
        self.enter(RemoteCall::Create(payload.clone())).await?;
        let mut state = self.state();
        let id = state.next_id;
        let entity: T = synthesize(id, payload).map_err(|e| bad_request::<T>(e.to_string()))?;
        state.next_id += 1;
        state.records.insert(id, entity.clone());
        Ok(entity)
    }

    async fn update(&self, id: EntityId, payload: &Value) -> Result<T, RemoteError> {
        self.enter(RemoteCall::Update(id, payload.clone())).await?;
        let mut state = self.state();
        let current = state.records.get(&id).ok_or_else(|| not_found::<T>(id))?;
        let patched = apply_patch(current, payload).map_err(|e| bad_request::<T>(e.to_string()))?;
        state.records.insert(id, patched.clone());
        Ok(patched)
    }

    async fn delete(&self, id: EntityId) -> Result<(), RemoteError> {
        self.enter(RemoteCall::Delete(id)).await?;
        let mut state = self.state();
        state
            .records
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found::<T>(id))
    }
}

// ============================================================================
// Prober
// ============================================================================

#[derive(Default)]
struct ProberState {
    reachable: HashMap<String, bool>,
    scripts: HashMap<String, VecDeque<bool>>,
    checks: HashMap<String, usize>,
    auth_checks: usize,
}

/// Prober answering from per-URL settings and queued scripts.
pub struct ScriptedProber {
    state: Mutex<ProberState>,
    default_reachable: bool,
    authenticated: AtomicBool,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProber {
    /// Every URL answers `default_reachable` until told otherwise.
    pub fn new(default_reachable: bool) -> Self {
        Self {
            state: Mutex::new(ProberState::default()),
            default_reachable,
            authenticated: AtomicBool::new(true),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Each check sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Probe URL used for an endpoint name in tests.
    pub fn url_for(name: &str) -> String {
        format!("http://mock.invalid/{}", name)
    }

    fn state(&self) -> MutexGuard<'_, ProberState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_reachable(&self, url: impl Into<String>, reachable: bool) {
        self.state().reachable.insert(url.into(), reachable);
    }

    /// Queue outcomes consumed before the per-URL setting applies again.
    pub fn script(&self, url: impl Into<String>, outcomes: impl IntoIterator<Item = bool>) {
        self.state()
            .scripts
            .entry(url.into())
            .or_default()
            .extend(outcomes);
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    pub fn checks(&self, url: &str) -> usize {
        self.state().checks.get(url).copied().unwrap_or(0)
    }

    pub fn auth_checks(&self) -> usize {
        self.state().auth_checks
    }

    /// Highest number of checks observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, url: &str) -> bool {
        let mut state = self.state();
        *state.checks.entry(url.to_string()).or_default() += 1;
        if let Some(outcome) = state.scripts.get_mut(url).and_then(VecDeque::pop_front) {
            return outcome;
        }
        state
            .reachable
            .get(url)
            .copied()
            .unwrap_or(self.default_reachable)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn check(&self, target: &ProbeTarget) -> ProbeOutcome {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reachable = self.next_outcome(&target.url);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if reachable {
            ProbeOutcome::reachable(self.delay.as_millis() as u64)
        } else {
            ProbeOutcome::unreachable(
                &ProbeError::Transport {
                    endpoint: target.url.clone(),
                    reason: "scripted outage".to_string(),
                },
                None,
            )
        }
    }

    async fn check_authenticated(&self, _target: &ProbeTarget, _credential: &str) -> bool {
        self.state().auth_checks += 1;
        self.authenticated.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tributo_core::Sector;

    #[tokio::test]
    async fn test_mock_remote_assigns_ids() {
        let remote = MockRemote::<Sector>::starting_at(42);
        let created = remote.create(&json!({"nombre": "Sector X"})).await.unwrap();
        assert_eq!(created.id, 42);
        assert_eq!(remote.records().len(), 1);
        assert_eq!(remote.calls(), vec![RemoteCall::Create(json!({"nombre": "Sector X"}))]);
    }

    #[tokio::test]
    async fn test_fail_mutation_counts_mutations_only() {
        let remote = MockRemote::<Sector>::new();
        remote.fail_mutation(2);

        remote.list().await.unwrap();
        remote.create(&json!({"nombre": "A"})).await.unwrap();
        assert!(remote.create(&json!({"nombre": "B"})).await.is_err());
        remote.create(&json!({"nombre": "C"})).await.unwrap();

        let names: Vec<String> = remote.records().into_iter().map(|s| s.nombre).collect();
        assert_eq!(names, vec!["A", "C"]);
    }

    #[tokio::test]
    async fn test_stalled_mutation_never_answers() {
        let remote = MockRemote::<Sector>::new();
        remote.stall_mutation(1);

        let stalled = tokio::time::timeout(
            Duration::from_millis(20),
            remote.create(&json!({"nombre": "A"})),
        )
        .await;
        assert!(stalled.is_err());
        assert!(remote.records().is_empty());

        remote.create(&json!({"nombre": "B"})).await.unwrap();
        assert_eq!(remote.mutation_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_record_is_404() {
        let remote = MockRemote::<Sector>::new();
        let err = remote.delete(7).await.unwrap_err();
        assert!(matches!(err, RemoteError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_scripted_prober_consumes_script_first() {
        let prober = ScriptedProber::new(true);
        let url = ScriptedProber::url_for("sector");
        prober.script(&url, [false, false]);
        let target = ProbeTarget::new(url.clone());

        assert!(!prober.check(&target).await.available);
        assert!(!prober.check(&target).await.available);
        assert!(prober.check(&target).await.available);
        assert_eq!(prober.checks(&url), 3);
    }
}

//! TRIBUTO Sync - Offline-first connectivity and mutation replay
//!
//! Per-endpoint reachability tracking ([`ConnectivityMonitor`]), offline
//! aware gateways per entity type ([`EntityGateway`]), and the coordinator
//! that replays queued changes once an endpoint answers again
//! ([`SyncCoordinator`]). [`OfflineRuntime`] wires all of it from a
//! [`SyncConfig`].

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod mock;
pub mod monitor;
pub mod probe;
pub mod remote;
pub mod telemetry;

pub use client::OfflineRuntime;
pub use config::{AuthConfig, ConfigError, EndpointConfig, SyncConfig};
pub use coordinator::{Replayable, SyncCoordinator};
pub use error::{SyncError, SyncResult};
pub use gateway::EntityGateway;
pub use mock::{MockRemote, RemoteCall, ScriptedProber};
pub use monitor::{
    ConnectivityMonitor, Listener, MonitorConfig, Subscription, DEFAULT_POLL_INTERVAL,
};
pub use probe::{is_reachable, HttpProber, Prober, DEFAULT_PROBE_TIMEOUT};
pub use remote::{RemoteEntityApi, RestEntityApi};
pub use telemetry::{init_tracing, TelemetryConfig};

//! Connectivity types shared by the probe and the monitor.

use crate::error::ProbeError;
use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Where and how an endpoint is probed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeTarget {
    /// Absolute URL of the endpoint resource.
    pub url: String,
    /// Whether an authenticated probe should follow a successful basic probe.
    pub requires_auth: bool,
}

impl ProbeTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            requires_auth: false,
        }
    }

    pub fn authenticated(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            requires_auth: true,
        }
    }
}

/// Reachability state of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointState {
    /// Registered but never checked
    Unknown,
    Available,
    Unavailable,
}

/// Result of a single probe. Probes never fail, they report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub available: bool,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
    /// `None` when no authenticated probe ran.
    pub authenticated: Option<bool>,
}

impl ProbeOutcome {
    /// Create a reachable outcome.
    pub fn reachable(response_time_ms: u64) -> Self {
        Self {
            available: true,
            response_time_ms: Some(response_time_ms),
            error: None,
            authenticated: None,
        }
    }

    /// Create an unreachable outcome from the error that caused it.
    pub fn unreachable(error: &ProbeError, response_time_ms: Option<u64>) -> Self {
        Self {
            available: false,
            response_time_ms,
            error: Some(error.to_string()),
            authenticated: None,
        }
    }

    /// Attach the result of the authenticated probe.
    pub fn with_authenticated(mut self, authenticated: bool) -> Self {
        self.authenticated = Some(authenticated);
        self
    }
}

/// Last known connectivity of one registered endpoint.
///
/// Fields are private so the `authenticated => available` invariant holds
/// for every record handed out by the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityRecord {
    name: String,
    available: bool,
    authenticated: bool,
    last_checked_at: Option<Timestamp>,
    response_time_ms: Option<u64>,
    last_error: Option<String>,
}

impl ConnectivityRecord {
    /// Create a record in the `Unknown` state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: false,
            authenticated: false,
            last_checked_at: None,
            response_time_ms: None,
            last_error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn available(&self) -> bool {
        self.available
    }

    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn last_checked_at(&self) -> Option<Timestamp> {
        self.last_checked_at
    }

    pub fn response_time_ms(&self) -> Option<u64> {
        self.response_time_ms
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn state(&self) -> EndpointState {
        match (self.last_checked_at, self.available) {
            (None, _) => EndpointState::Unknown,
            (Some(_), true) => EndpointState::Available,
            (Some(_), false) => EndpointState::Unavailable,
        }
    }

    /// Fold a probe outcome into the record.
    ///
    /// Returns `true` when `available` or `authenticated` changed, or when the
    /// record left the `Unknown` state.
    pub fn apply_probe(&mut self, outcome: &ProbeOutcome, at: Timestamp) -> bool {
        let before = (self.state(), self.authenticated);

        self.available = outcome.available;
        self.authenticated = outcome.available && outcome.authenticated.unwrap_or(false);
        self.last_checked_at = Some(at);
        self.response_time_ms = outcome.response_time_ms;
        self.last_error = outcome.error.clone();

        before != (self.state(), self.authenticated)
    }

    /// Mark the endpoint unreachable without probing it.
    ///
    /// Returns `true` when this was a transition.
    pub fn mark_unavailable(&mut self, reason: impl Into<String>, at: Timestamp) -> bool {
        let before = (self.state(), self.authenticated);

        self.available = false;
        self.authenticated = false;
        self.last_checked_at = Some(at);
        self.response_time_ms = None;
        self.last_error = Some(reason.into());

        before != (self.state(), self.authenticated)
    }
}

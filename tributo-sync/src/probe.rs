//! Single-endpoint reachability checks.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use tributo_core::{ProbeError, ProbeOutcome, ProbeTarget};

/// Default bound on a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Performs reachability checks. Implementations never fail: every error is
/// folded into an unavailable [`ProbeOutcome`].
#[async_trait]
pub trait Prober: Send + Sync {
    /// Basic reachability check, no credentials.
    async fn check(&self, target: &ProbeTarget) -> ProbeOutcome;

    /// Whether a call carrying `credential` is accepted by the endpoint.
    async fn check_authenticated(&self, target: &ProbeTarget, credential: &str) -> bool;
}

/// Statuses proving the endpoint answered, even if it wants credentials.
pub fn is_reachable(status: StatusCode) -> bool {
    status.is_success()
        || status.is_redirection()
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
}

/// HTTP prober: `OPTIONS` first, one `HEAD` fallback.
#[derive(Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }

    /// Share an existing client; `timeout` still bounds every probe.
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn attempt(
        &self,
        method: Method,
        url: &str,
        credential: Option<&str>,
    ) -> Result<StatusCode, ProbeError> {
        let mut request = self.client.request(method, url);
        if let Some(token) = credential {
            request = request.bearer_auth(token);
        }
        match request.send().await {
            Ok(response) => Ok(response.status()),
            Err(e) if e.is_timeout() => Err(ProbeError::Timeout {
                endpoint: url.to_string(),
                timeout: self.timeout,
            }),
            Err(e) => Err(ProbeError::Transport {
                endpoint: url.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn reachable(&self, method: Method, url: &str) -> Result<(), ProbeError> {
        let status = self.attempt(method, url, None).await?;
        if is_reachable(status) {
            Ok(())
        } else {
            Err(ProbeError::Transport {
                endpoint: url.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            })
        }
    }

    async fn primary_then_fallback(&self, url: &str) -> Result<(), ProbeError> {
        match self.reachable(Method::OPTIONS, url).await {
            Ok(()) => Ok(()),
            Err(first) => {
                tracing::debug!(
                    endpoint = url,
                    error = %first,
                    "OPTIONS probe failed, retrying with HEAD"
                );
                self.reachable(Method::HEAD, url).await
            }
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn check(&self, target: &ProbeTarget) -> ProbeOutcome {
        let started = Instant::now();
        let attempt = self.primary_then_fallback(&target.url);
        let result = match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout {
                endpoint: target.url.clone(),
                timeout: self.timeout,
            }),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => ProbeOutcome::reachable(elapsed_ms),
            Err(e) => ProbeOutcome::unreachable(&e, Some(elapsed_ms)),
        }
    }

    async fn check_authenticated(&self, target: &ProbeTarget, credential: &str) -> bool {
        let attempt = self.attempt(Method::GET, &target.url, Some(credential));
        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(status)) => status.is_success(),
            Ok(Err(e)) => {
                tracing::debug!(endpoint = %target.url, error = %e, "Authenticated probe failed");
                false
            }
            Err(_) => false,
        }
    }
}

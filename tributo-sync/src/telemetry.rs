//! Tracing subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{SyncError, SyncResult};

pub const DEFAULT_FILTER: &str = "tributo_sync=debug,tributo_storage=info,info";

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Filter used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
    /// Service name attached to the startup event.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl TelemetryConfig {
    /// Build from `TRIBUTO_LOG_JSON` and `TRIBUTO_SERVICE_NAME` as answered
    /// by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            json: lookup("TRIBUTO_LOG_JSON").is_some_and(|s| s == "true" || s == "1"),
            default_filter: DEFAULT_FILTER.to_string(),
            service_name: lookup("TRIBUTO_SERVICE_NAME")
                .unwrap_or_else(|| "tributo-sync".to_string()),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup. A second call fails because a subscriber is
/// already installed.
pub fn init_tracing(config: &TelemetryConfig) -> SyncResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    result.map_err(|e| SyncError::Telemetry(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = config.service_name,
        json = config.json,
        "Telemetry initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_from_env() {
        let config = TelemetryConfig::from_lookup(|key| match key {
            "TRIBUTO_LOG_JSON" => Some("1".to_string()),
            _ => None,
        });
        assert!(config.json);
        assert_eq!(config.service_name, "tributo-sync");
        assert_eq!(config.default_filter, DEFAULT_FILTER);

        let named = TelemetryConfig::from_lookup(|key| {
            (key == "TRIBUTO_SERVICE_NAME").then(|| "padron".to_string())
        });
        assert!(!named.json);
        assert_eq!(named.service_name, "padron");
    }

    #[test]
    fn test_second_init_fails() {
        let config = TelemetryConfig {
            json: false,
            ..TelemetryConfig::default()
        };
        // Another test in this binary may have installed one already.
        let _ = init_tracing(&config);
        assert!(matches!(init_tracing(&config), Err(SyncError::Telemetry(_))));
    }
}

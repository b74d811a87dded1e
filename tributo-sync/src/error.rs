//! Error types for the sync runtime.

use tributo_core::TributoError;
use tributo_storage::LmdbStoreError;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] LmdbStoreError),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Endpoint '{0}' is not configured")]
    UnknownEndpoint(String),
    #[error("Telemetry error: {0}")]
    Telemetry(String),
    #[error(transparent)]
    Tributo(#[from] TributoError),
}

pub type SyncResult<T> = Result<T, SyncError>;

//! Error types for TRIBUTO operations

use crate::EntityId;
use std::time::Duration;
use thiserror::Error;

/// Reachability probe errors.
///
/// These never escape the probe: they are folded into a
/// [`ProbeOutcome`](crate::ProbeOutcome) with `available = false`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Probe of {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("Probe of {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },
}

/// Errors raised by a remote entity operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("Transport failure calling {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("HTTP {status} from {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

/// Local persistence errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Corrupt persisted value under {key}: {reason}")]
    CacheCorrupt { key: String, reason: String },

    #[error("Serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Storage backend failure: {reason}")]
    Backend { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Replay errors for a single queued change.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("Replay of change enqueued at {enqueued_at} failed: {source}")]
    Remote {
        enqueued_at: i64,
        #[source]
        source: RemoteError,
    },

    #[error("Change enqueued at {enqueued_at} targets temporary id {temporary_id} that has no server id yet")]
    UnresolvedTemporaryId { enqueued_at: i64, temporary_id: EntityId },

    #[error("Change enqueued at {enqueued_at} is malformed: {reason}")]
    Malformed { enqueued_at: i64, reason: String },
}

/// Entity shape errors (payload merges, synthesized records).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityError {
    #[error("{entity_type} with id {id} not found in local cache")]
    NotFound { entity_type: String, id: EntityId },

    #[error("Payload for {entity_type} must be a JSON object")]
    PayloadNotObject { entity_type: String },

    #[error("Could not build {entity_type} from payload: {reason}")]
    InvalidPayload { entity_type: String, reason: String },
}

/// Master error type for all TRIBUTO errors.
#[derive(Debug, Clone, Error)]
pub enum TributoError {
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    #[error("Entity error: {0}")]
    Entity(#[from] EntityError),
}

/// Result type alias for TRIBUTO operations.
pub type TributoResult<T> = Result<T, TributoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_status_display() {
        let err = RemoteError::Status {
            endpoint: "sector".to_string(),
            status: 503,
            body: "maintenance".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("sector"));
        assert!(msg.contains("maintenance"));
    }

    #[test]
    fn test_cache_corrupt_display() {
        let err = StorageError::CacheCorrupt {
            key: "sector_cache".to_string(),
            reason: "expected value at line 1".to_string(),
        };
        assert!(err.to_string().contains("sector_cache"));
    }

    #[test]
    fn test_unresolved_temporary_id_display() {
        let err = ReplayError::UnresolvedTemporaryId {
            enqueued_at: 10,
            temporary_id: -3,
        };
        assert!(err.to_string().contains("-3"));
    }

    #[test]
    fn test_umbrella_conversion() {
        let err: TributoError = EntityError::NotFound {
            entity_type: "via".to_string(),
            id: 7,
        }
        .into();
        assert!(matches!(err, TributoError::Entity(EntityError::NotFound { id: 7, .. })));
    }
}

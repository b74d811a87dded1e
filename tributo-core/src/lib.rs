//! TRIBUTO Core - Offline Sync Data Types
//!
//! Pure data structures shared by the storage and sync crates.
//! This crate contains ONLY data types and the pure helpers that operate on
//! them - no I/O.

use chrono::{DateTime, Utc};

pub mod change;
pub mod connectivity;
pub mod entities;
pub mod entity;
pub mod error;

pub use change::{
    is_temporary_id, next_enqueued_at, next_temporary_id, sort_for_replay, ChangeKind,
    PendingChange, SyncReport,
};
pub use connectivity::{ConnectivityRecord, EndpointState, ProbeOutcome, ProbeTarget};
pub use entities::{Sector, Street};
pub use entity::{apply_patch, payload_of, synthesize, SyncEntity};
pub use error::{
    EntityError, ProbeError, RemoteError, ReplayError, StorageError, TributoError, TributoResult,
};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Entity identifier. Server ids are positive, temporary ids negative.
pub type EntityId = i64;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Current time in epoch milliseconds, the unit of `enqueued_at`.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

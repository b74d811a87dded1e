//! Queued offline mutations and replay reports.

use crate::EntityId;
use serde::{Deserialize, Serialize};

/// Kind of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// One mutation recorded while its endpoint was unreachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub kind: ChangeKind,
    /// Server id for updates and deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<EntityId>,
    /// Locally assigned id for creates, always negative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary_id: Option<EntityId>,
    pub payload: serde_json::Value,
    /// Replay order key, in epoch milliseconds.
    pub enqueued_at: i64,
}

impl PendingChange {
    pub fn create(temporary_id: EntityId, payload: serde_json::Value, enqueued_at: i64) -> Self {
        Self {
            kind: ChangeKind::Create,
            target_id: None,
            temporary_id: Some(temporary_id),
            payload,
            enqueued_at,
        }
    }

    pub fn update(target_id: EntityId, payload: serde_json::Value, enqueued_at: i64) -> Self {
        Self {
            kind: ChangeKind::Update,
            target_id: Some(target_id),
            temporary_id: None,
            payload,
            enqueued_at,
        }
    }

    pub fn delete(target_id: EntityId, enqueued_at: i64) -> Self {
        Self {
            kind: ChangeKind::Delete,
            target_id: Some(target_id),
            temporary_id: None,
            payload: serde_json::Value::Null,
            enqueued_at,
        }
    }

    /// Whether this change points at an entity that only exists locally.
    pub fn targets_temporary_id(&self) -> bool {
        self.target_id.is_some_and(is_temporary_id)
    }
}

/// Temporary ids are drawn from the negative integers; server ids are positive.
pub fn is_temporary_id(id: EntityId) -> bool {
    id < 0
}

/// Next temporary id that collides with none of `in_use`.
pub fn next_temporary_id(in_use: impl IntoIterator<Item = EntityId>) -> EntityId {
    in_use
        .into_iter()
        .filter(|id| is_temporary_id(*id))
        .min()
        .map_or(-1, |lowest| lowest - 1)
}

/// Next `enqueued_at` for a queue, strictly greater than every existing key.
pub fn next_enqueued_at(queue: &[PendingChange], now_ms: i64) -> i64 {
    match queue.iter().map(|c| c.enqueued_at).max() {
        Some(last) if last >= now_ms => last + 1,
        _ => now_ms,
    }
}

/// Sort a queue into replay order.
pub fn sort_for_replay(queue: &mut [PendingChange]) {
    queue.sort_by_key(|c| c.enqueued_at);
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Another pass for the same entity type was already running.
    pub skipped: bool,
}

impl SyncReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}

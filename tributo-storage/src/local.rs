//! Typed local mirror: cached collections and pending change queues.
//!
//! Layout over the key-value store:
//!
//! - `<entityType>_cache` → JSON array of entities (last known-good collection)
//! - `pending_<entityType>_changes` → JSON array of [`PendingChange`]
//!
//! A value that no longer parses is treated as lost: it is logged, removed,
//! and the caller starts from an empty collection or queue.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tributo_core::{PendingChange, StorageError, SyncEntity};

use crate::store::{InMemoryStore, KeyValueStore};

/// Key of the cached collection for an entity type.
pub fn cache_key(entity_type: &str) -> String {
    format!("{}_cache", entity_type)
}

/// Key of the pending change queue for an entity type.
pub fn queue_key(entity_type: &str) -> String {
    format!("pending_{}_changes", entity_type)
}

/// Typed access to the local mirror.
#[derive(Clone)]
pub struct LocalStore {
    store: Arc<dyn KeyValueStore>,
}

impl LocalStore {
    pub fn new<S: KeyValueStore + 'static>(store: S) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// A mirror that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::new(InMemoryStore::new())
    }

    /// The underlying key-value store.
    pub fn backend(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    /// Load the cached collection. `None` means nothing was ever cached.
    pub fn load_cache<T: SyncEntity>(&self) -> Result<Option<Vec<T>>, StorageError> {
        self.read_json(&cache_key(T::ENTITY_TYPE))
    }

    /// Replace the cached collection.
    pub fn save_cache<T: SyncEntity>(&self, items: &[T]) -> Result<(), StorageError> {
        self.write_json(&cache_key(T::ENTITY_TYPE), items)
    }

    /// Load the pending queue in stored order.
    pub fn load_queue(&self, entity_type: &str) -> Result<Vec<PendingChange>, StorageError> {
        Ok(self.read_json(&queue_key(entity_type))?.unwrap_or_default())
    }

    /// Persist the pending queue. An empty queue removes the key.
    pub fn save_queue(
        &self,
        entity_type: &str,
        queue: &[PendingChange],
    ) -> Result<(), StorageError> {
        let key = queue_key(entity_type);
        if queue.is_empty() {
            return self.store.remove(&key);
        }
        self.write_json(&key, queue)
    }

    /// Number of changes waiting for replay.
    pub fn pending_count(&self, entity_type: &str) -> Result<usize, StorageError> {
        Ok(self.load_queue(entity_type)?.len())
    }

    fn read_json<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, StorageError> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str::<V>(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                let corrupt = StorageError::CacheCorrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                };
                tracing::warn!(key, error = %corrupt, "Discarding corrupt persisted value");
                self.store.remove(key)?;
                Ok(None)
            }
        }
    }

    fn write_json<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value).map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.store.set(key, &raw)
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use tributo_core::{ChangeKind, Sector};

    fn shared() -> (InMemoryStore, LocalStore) {
        let raw = InMemoryStore::new();
        (raw.clone(), LocalStore::new(raw))
    }

    #[test]
    fn test_keys() {
        assert_eq!(cache_key("sector"), "sector_cache");
        assert_eq!(queue_key("sector"), "pending_sector_changes");
    }

    #[test]
    fn test_cache_round_trip() {
        let (_, local) = shared();
        assert_eq!(local.load_cache::<Sector>().unwrap(), None);

        let sectors = vec![Sector {
            id: 1,
            nombre: "Centro".to_string(),
            descripcion: None,
        }];
        local.save_cache(&sectors).unwrap();
        assert_eq!(local.load_cache::<Sector>().unwrap(), Some(sectors));
    }

    #[test]
    fn test_empty_queue_removes_key() {
        let (raw, local) = shared();
        local
            .save_queue("sector", &[PendingChange::delete(3, 1)])
            .unwrap();
        assert_eq!(raw.keys(), vec!["pending_sector_changes".to_string()]);

        local.save_queue("sector", &[]).unwrap();
        assert!(raw.is_empty());
        assert_eq!(local.pending_count("sector").unwrap(), 0);
    }

    #[test]
    fn test_corrupt_cache_is_discarded() {
        let (raw, local) = shared();
        raw.set("sector_cache", "{not json").unwrap();

        assert_eq!(local.load_cache::<Sector>().unwrap(), None);
        assert_eq!(raw.get("sector_cache").unwrap(), None);
    }

    #[test]
    fn test_corrupt_queue_starts_empty() {
        let (raw, local) = shared();
        raw.set("pending_via_changes", r#"[{"kind":"explode"}]"#).unwrap();

        assert!(local.load_queue("via").unwrap().is_empty());
        assert_eq!(raw.get("pending_via_changes").unwrap(), None);
    }

    #[test]
    fn test_queue_preserves_stored_order() {
        let (_, local) = shared();
        let queue = vec![
            PendingChange::update(1, json!({"nombre": "B"}), 20),
            PendingChange::create(-1, json!({"nombre": "A"}), 10),
        ];
        local.save_queue("sector", &queue).unwrap();
        let loaded = local.load_queue("sector").unwrap();
        assert_eq!(loaded, queue);
    }

    fn arb_change() -> impl Strategy<Value = PendingChange> {
        (
            prop_oneof![
                Just(ChangeKind::Create),
                Just(ChangeKind::Update),
                Just(ChangeKind::Delete)
            ],
            1i64..1_000,
            "[a-zA-Z ]{0,12}",
            0i64..1_000_000,
        )
            .prop_map(|(kind, id, nombre, at)| match kind {
                ChangeKind::Create => PendingChange::create(-id, json!({"nombre": nombre}), at),
                ChangeKind::Update => PendingChange::update(id, json!({"nombre": nombre}), at),
                ChangeKind::Delete => PendingChange::delete(id, at),
            })
    }

    proptest! {
        #[test]
        fn prop_queue_survives_persistence(queue in proptest::collection::vec(arb_change(), 0..20)) {
            let (_, local) = shared();
            local.save_queue("sector", &queue).unwrap();
            prop_assert_eq!(local.load_queue("sector").unwrap(), queue);
        }
    }
}

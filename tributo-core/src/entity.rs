//! The entity contract every gateway is parameterized over.

use crate::error::EntityError;
use crate::EntityId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// A reference-data record that can be cached and mutated offline.
///
/// # Implementation Requirements
///
/// - `ENTITY_TYPE` names the endpoint and the persisted keys
///   (`<type>_cache`, `pending_<type>_changes`)
/// - the serialized form must be a JSON object carrying the id under `ID_FIELD`
/// - implementations must be `Clone`, `Serialize`, and `DeserializeOwned`
pub trait SyncEntity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Entity type name, also the endpoint name in the connectivity monitor.
    const ENTITY_TYPE: &'static str;

    /// Field holding the identifier in the JSON form.
    const ID_FIELD: &'static str = "id";

    /// Identifier of this record (negative while only known locally).
    fn id(&self) -> EntityId;
}

fn payload_object<T: SyncEntity>(payload: &Value) -> Result<&Map<String, Value>, EntityError> {
    payload.as_object().ok_or_else(|| EntityError::PayloadNotObject {
        entity_type: T::ENTITY_TYPE.to_string(),
    })
}

fn from_json<T: SyncEntity>(value: Value) -> Result<T, EntityError> {
    serde_json::from_value(value).map_err(|e| EntityError::InvalidPayload {
        entity_type: T::ENTITY_TYPE.to_string(),
        reason: e.to_string(),
    })
}

/// Build an entity from a create payload and a locally assigned id.
pub fn synthesize<T: SyncEntity>(id: EntityId, payload: &Value) -> Result<T, EntityError> {
    let mut fields = payload_object::<T>(payload)?.clone();
    fields.insert(T::ID_FIELD.to_string(), Value::from(id));
    from_json(Value::Object(fields))
}

/// Merge the payload's fields over an existing entity.
///
/// The id field is never overwritten by a patch.
pub fn apply_patch<T: SyncEntity>(entity: &T, payload: &Value) -> Result<T, EntityError> {
    let patch = payload_object::<T>(payload)?;
    let mut current = serde_json::to_value(entity).map_err(|e| EntityError::InvalidPayload {
        entity_type: T::ENTITY_TYPE.to_string(),
        reason: e.to_string(),
    })?;
    let fields = current
        .as_object_mut()
        .ok_or_else(|| EntityError::PayloadNotObject {
            entity_type: T::ENTITY_TYPE.to_string(),
        })?;
    for (key, value) in patch {
        if key != T::ID_FIELD {
            fields.insert(key.clone(), value.clone());
        }
    }
    from_json(current)
}

/// Serialize an entity without its id, as a create payload.
pub fn payload_of<T: SyncEntity>(entity: &T) -> Result<Value, EntityError> {
    let mut value = serde_json::to_value(entity).map_err(|e| EntityError::InvalidPayload {
        entity_type: T::ENTITY_TYPE.to_string(),
        reason: e.to_string(),
    })?;
    if let Some(fields) = value.as_object_mut() {
        fields.remove(T::ID_FIELD);
    }
    Ok(value)
}

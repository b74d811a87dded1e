//! Reference-data entities edited through offline-capable gateways.

use crate::entity::SyncEntity;
use crate::EntityId;
use serde::{Deserialize, Serialize};

/// Municipal sector (cadastral zone).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sector {
    pub id: EntityId,
    pub nombre: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descripcion: Option<String>,
}

impl SyncEntity for Sector {
    const ENTITY_TYPE: &'static str = "sector";

    fn id(&self) -> EntityId {
        self.id
    }
}

/// Street, served by the `via` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Street {
    pub id: EntityId,
    pub nombre: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector_id: Option<EntityId>,
}

impl SyncEntity for Street {
    const ENTITY_TYPE: &'static str = "via";

    fn id(&self) -> EntityId {
        self.id
    }
}

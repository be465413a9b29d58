//! Deletion log entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EntityKind, NodeId};

/// A recorded deletion, fanned out to peers so they drop the entity too.
///
/// Keyed by `(entity_type, entity_id)`; re-recording refreshes the author
/// and timestamp instead of adding a second row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tombstone {
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub deleted_by_node_id: NodeId,
    pub deleted_at: DateTime<Utc>,
}

impl Tombstone {
    pub fn new(
        entity_type: EntityKind,
        entity_id: impl Into<String>,
        deleted_by_node_id: impl Into<String>,
    ) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            deleted_by_node_id: deleted_by_node_id.into(),
            deleted_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let t = Tombstone::new(EntityKind::User, "u1", "node-a");
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["entity_type"], "user");
        assert_eq!(json["entity_id"], "u1");
        assert_eq!(json["deleted_by_node_id"], "node-a");
    }
}

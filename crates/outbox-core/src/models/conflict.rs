//! Sync conflict model

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{EntityId, VersionMarker};

/// Why a queued write could not be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// The remote entity advanced past the version the local edit was based on
    ConcurrentModification,
}

/// One side of a conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityVersion {
    pub payload: Value,
    pub version: Option<VersionMarker>,
}

/// A detected mismatch awaiting an explicit resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Entity involved in the conflict
    pub entity_id: EntityId,
    /// Queued local payload and the version it was based on
    pub local_version: EntityVersion,
    /// Payload and version found on the remote at drain time
    pub remote_version: EntityVersion,
    pub conflict_type: ConflictType,
    /// Detection timestamp (Unix ms)
    pub detected_at: i64,
}

/// Caller's choice for a conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resolution {
    /// Push the local payload, overriding the remote once
    UseLocal,
    /// Drop the local change and adopt the remote entity
    UseRemote,
    /// Push a caller-built merge of both sides
    Merge { payload: Value },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolution_wire_shape() {
        let parsed: Resolution = serde_json::from_value(json!({"type": "use_remote"})).unwrap();
        assert_eq!(parsed, Resolution::UseRemote);

        let merge = Resolution::Merge {
            payload: json!({"title": "merged"}),
        };
        assert_eq!(
            serde_json::to_value(&merge).unwrap(),
            json!({"type": "merge", "payload": {"title": "merged"}})
        );
    }

    #[test]
    fn test_conflict_type_name() {
        assert_eq!(
            serde_json::to_value(ConflictType::ConcurrentModification).unwrap(),
            json!("concurrent_modification")
        );
    }
}

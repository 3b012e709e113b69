//! Queued mutation model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::{EntityId, VersionMarker};

/// Kind of mutation carried by a queued action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    /// Operation written by a newer client that this build cannot apply
    #[serde(other)]
    Unknown,
}

impl Operation {
    /// Merge a new mutation into one already pending for the same entity.
    ///
    /// A delete always wins. A pending create absorbs later edits because the
    /// remote has not seen the entity yet. Anything queued after a delete
    /// resurrects the entity as an update.
    #[must_use]
    pub const fn coalesce(self, next: Self) -> Self {
        match (self, next) {
            (_, Self::Delete) => Self::Delete,
            (Self::Create, Self::Create | Self::Update) => Self::Create,
            (Self::Update | Self::Delete, Self::Create | Self::Update) => Self::Update,
            (Self::Unknown, next) | (_, next @ Self::Unknown) => next,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown operation '{other}'")),
        }
    }
}

/// A mutation submitted by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAction {
    pub id: EntityId,
    pub operation: Operation,
    pub payload: Value,
    /// Version the caller last observed; filled from the cache when omitted
    #[serde(default)]
    pub base_version: Option<VersionMarker>,
}

impl NewAction {
    pub fn create(id: impl Into<EntityId>, payload: Value) -> Self {
        Self {
            id: id.into(),
            operation: Operation::Create,
            payload,
            base_version: None,
        }
    }

    pub fn update(id: impl Into<EntityId>, payload: Value) -> Self {
        Self {
            id: id.into(),
            operation: Operation::Update,
            payload,
            base_version: None,
        }
    }

    pub fn delete(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            operation: Operation::Delete,
            payload: Value::Null,
            base_version: None,
        }
    }

    #[must_use]
    pub fn with_base_version(mut self, version: impl Into<VersionMarker>) -> Self {
        self.base_version = Some(version.into());
        self
    }
}

/// A pending mutation held by the action queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    /// Target entity
    pub id: EntityId,
    /// Mutation to apply remotely
    pub operation: Operation,
    /// Entity snapshot (opaque to the queue)
    pub payload: Value,
    /// Enqueue time of the first un-synced edit (Unix ms)
    pub timestamp: i64,
    /// Insertion sequence; defines drain order and survives coalescing
    pub seq: u64,
    /// Sync attempts made so far
    pub attempts: u32,
    /// Remote version observed when the first un-synced edit was queued
    #[serde(default)]
    pub base_version: Option<VersionMarker>,
    /// Bumped every time a newer edit is coalesced into this entry
    #[serde(default)]
    pub revision: u32,
    /// Skip the version check on the next write
    #[serde(default)]
    pub force: bool,
    /// Blocked until the recorded conflict is resolved
    #[serde(default)]
    pub conflicted: bool,
}

impl QueuedAction {
    /// Check that the action can ever be applied.
    ///
    /// Failures are permanent: retrying the same action cannot fix them.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.as_str().trim().is_empty() {
            return Err("entity id is empty".to_string());
        }
        match self.operation {
            Operation::Create | Operation::Update if !self.payload.is_object() => Err(format!(
                "{} payload for {} must be a JSON object",
                self.operation, self.id
            )),
            Operation::Unknown => Err(format!("unknown operation queued for {}", self.id)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coalesce_delete_wins() {
        assert_eq!(Operation::Create.coalesce(Operation::Delete), Operation::Delete);
        assert_eq!(Operation::Update.coalesce(Operation::Delete), Operation::Delete);
        assert_eq!(Operation::Delete.coalesce(Operation::Delete), Operation::Delete);
    }

    #[test]
    fn test_coalesce_pending_create_absorbs_edits() {
        assert_eq!(Operation::Create.coalesce(Operation::Update), Operation::Create);
        assert_eq!(Operation::Create.coalesce(Operation::Create), Operation::Create);
    }

    #[test]
    fn test_coalesce_after_delete_resurrects_as_update() {
        assert_eq!(Operation::Delete.coalesce(Operation::Create), Operation::Update);
        assert_eq!(Operation::Delete.coalesce(Operation::Update), Operation::Update);
        assert_eq!(Operation::Update.coalesce(Operation::Create), Operation::Update);
    }

    #[test]
    fn test_unknown_operation_deserializes() {
        let op: Operation = serde_json::from_str("\"archive\"").unwrap();
        assert_eq!(op, Operation::Unknown);
        assert!("archive".parse::<Operation>().is_err());
        assert_eq!(" Update ".parse::<Operation>().unwrap(), Operation::Update);
    }

    #[test]
    fn test_validate_rejects_non_object_payload() {
        let action = QueuedAction {
            id: EntityId::from("n1"),
            operation: Operation::Create,
            payload: json!("just a string"),
            timestamp: 0,
            seq: 0,
            attempts: 0,
            base_version: None,
            revision: 0,
            force: false,
            conflicted: false,
        };
        assert!(action.validate().is_err());

        let delete = QueuedAction {
            operation: Operation::Delete,
            payload: Value::Null,
            ..action
        };
        assert!(delete.validate().is_ok());
    }
}

//! Records, sync status and the `Entity` trait shared by every entity type.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::store::{Mutation, QueuePayload};

/// Prefix reserved for client-generated ids the server has not seen yet.
pub const LOCAL_ID_PREFIX: &str = "local_";

/// Generates a fresh local-origin id.
pub fn new_local_id() -> String {
    format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4().simple())
}

/// Returns true if `id` was generated client-side and is not yet known to the server.
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// Entity types known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Account,
    Contact,
}

impl EntityType {
    pub const ALL: [EntityType; 2] = [EntityType::Account, EntityType::Contact];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Account => "account",
            EntityType::Contact => "contact",
        }
    }

    /// Local table holding records of this type.
    pub fn table(&self) -> &'static str {
        match self {
            EntityType::Account => "accounts",
            EntityType::Contact => "contacts",
        }
    }

    /// Collection segment used by the remote API.
    pub fn collection(&self) -> &'static str {
        self.table()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "account" => Ok(EntityType::Account),
            "contact" => Ok(EntityType::Contact),
            other => Err(format!("unknown entity type '{}'", other)),
        }
    }
}

/// Relationship of a local record to the authoritative store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    Created,
    Updated,
    Deleted,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Created => "created",
            SyncStatus::Updated => "updated",
            SyncStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(SyncStatus::Synced),
            "created" => Ok(SyncStatus::Created),
            "updated" => Ok(SyncStatus::Updated),
            "deleted" => Ok(SyncStatus::Deleted),
            other => Err(format!("unknown sync status '{}'", other)),
        }
    }
}

/// A record as callers see it: id plus domain fields, no sync metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    pub id: String,
    #[serde(flatten)]
    pub payload: T,
}

impl<T> Record<T> {
    pub fn new(id: impl Into<String>, payload: T) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    pub fn is_local(&self) -> bool {
        is_local_id(&self.id)
    }
}

/// A record together with the metadata the engine keeps for it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord<T> {
    pub record: Record<T>,
    pub sync_status: SyncStatus,
    pub last_modified: DateTime<Utc>,
}

/// A domain type the engine can store, queue and replay.
///
/// Payloads are opaque to the engine except for the foreign keys exposed by
/// [`Entity::references_mut`], which reconciliation rewrites.
pub trait Entity:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + Unpin + 'static
{
    /// Partial update; every field optional, absent fields untouched.
    type Patch: Clone
        + fmt::Debug
        + Default
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    const ENTITY_TYPE: EntityType;

    /// Foreign keys to other records, by id.
    fn references_mut(&mut self) -> Vec<&mut String> {
        Vec::new()
    }

    /// Foreign keys carried by a patch.
    fn patch_references_mut(_patch: &mut Self::Patch) -> Vec<&mut String> {
        Vec::new()
    }

    /// Wraps a mutation of this type into the queue's tagged union.
    fn into_payload(mutation: Mutation<Self>) -> QueuePayload;

    /// Unwraps a queue payload if it belongs to this type.
    fn from_payload(payload: QueuePayload) -> Option<Mutation<Self>>;
}

/// Overlays `overlay` onto `base`. Null and absent overlay fields leave the
/// base untouched; nested objects merge recursively.
pub fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_json(existing, value)
                    }
                    _ => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (base, overlay) => *base = overlay,
    }
}

/// Applies a patch to a payload.
pub fn apply_patch<T: Entity>(payload: &T, patch: &T::Patch) -> Result<T, serde_json::Error> {
    let mut value = serde_json::to_value(payload)?;
    merge_json(&mut value, serde_json::to_value(patch)?);
    serde_json::from_value(value)
}

/// Folds a later patch into an earlier one; the later patch wins per field.
pub fn merge_patches<T: Entity>(
    earlier: &T::Patch,
    later: &T::Patch,
) -> Result<T::Patch, serde_json::Error> {
    let mut value = serde_json::to_value(earlier)?;
    merge_json(&mut value, serde_json::to_value(later)?);
    serde_json::from_value(value)
}

/// Merges an authoritative server payload over a local one: server fields
/// take precedence, fields only the local copy carries are preserved.
pub fn merge_server<T: Entity>(local: &T, server: &T) -> Result<T, serde_json::Error> {
    let mut value = serde_json::to_value(local)?;
    merge_json(&mut value, serde_json::to_value(server)?);
    serde_json::from_value(value)
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scope State document and resource records.
//!
//! The State document is the persisted unit at a scope path and the sole
//! source of truth for what a previous run deployed:
//!
//! ```json
//! {
//!   "schemaVersion": 1,
//!   "resources": { "db": { "id": "db-1", "type": "postgres", ... } },
//!   "nestedScopes": ["workers"],
//!   "updatedAt": 1700000000000
//! }
//! ```

pub mod store;

pub use store::{SnapshotInfo, StateStore};

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScopeError};

/// Schema version written by this release.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// One tracked unit within a scope.
///
/// `metadata` is opaque to the engine. It is stored verbatim (base64 in the
/// JSON document) and only interpreted by the destroy capability registered
/// for `resource_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    /// Unique identifier within the scope (e.g. the provider's resource id).
    pub id: String,
    /// Resource kind tag, used to select the destroy capability.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Human-readable name.
    pub name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    /// Type-specific payload.
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<u8>,
}

impl ResourceRecord {
    pub fn new(
        id: impl Into<String>,
        resource_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            name: name.into(),
            created_at: now,
            updated_at: now,
            metadata: Vec::new(),
        }
    }

    /// Attach a raw metadata blob.
    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach metadata serialized as JSON.
    pub fn with_json_metadata<T: Serialize>(mut self, metadata: &T) -> Result<Self> {
        self.metadata = serde_json::to_vec(metadata)?;
        Ok(self)
    }

    /// Decode metadata previously attached with [`with_json_metadata`](Self::with_json_metadata).
    pub fn metadata_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.metadata)?)
    }
}

/// The persisted document at a scope path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeState {
    pub schema_version: u32,
    /// Records keyed by the caller-chosen logical key.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,
    /// Names of nested scopes directly below this one.
    #[serde(default)]
    pub nested_scopes: BTreeSet<String>,
    /// Strictly increases on every successful save.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Default for ScopeState {
    fn default() -> Self {
        Self::empty()
    }
}

impl ScopeState {
    /// State of a scope that has never been saved.
    pub fn empty() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            resources: BTreeMap::new(),
            nested_scopes: BTreeSet::new(),
            updated_at: DateTime::<Utc>::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.nested_scopes.is_empty()
    }

    /// Find the key whose record carries `id`.
    pub fn key_for_id(&self, id: &str) -> Option<&str> {
        self.resources
            .iter()
            .find(|(_, record)| record.id == id)
            .map(|(key, _)| key.as_str())
    }

    /// Advance `updated_at` to now, or 1 ms past the previous value when the
    /// clock has not moved (or moved backwards).
    pub fn touch(&mut self) {
        let previous = self.updated_at.timestamp_millis();
        let next = now_millis().timestamp_millis().max(previous.saturating_add(1));
        self.updated_at = DateTime::from_timestamp_millis(next).unwrap_or_else(Utc::now);
    }

    /// Parse a State document, mapping any failure to `Corrupted`.
    pub fn from_slice(path: &str, bytes: &[u8]) -> Result<Self> {
        let state: ScopeState =
            serde_json::from_slice(bytes).map_err(|e| ScopeError::Corrupted {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        if state.schema_version > CURRENT_SCHEMA_VERSION {
            return Err(ScopeError::Corrupted {
                path: path.to_string(),
                reason: format!(
                    "unsupported schema version {} (newest known is {})",
                    state.schema_version, CURRENT_SCHEMA_VERSION
                ),
            });
        }
        Ok(state)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Current time truncated to millisecond precision, matching what the
/// document stores.
pub(crate) fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_json_shape() {
        let record = ResourceRecord::new("db-1", "postgres", "main database")
            .with_metadata(b"opaque".to_vec());
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["id"], "db-1");
        assert_eq!(value["type"], "postgres");
        assert_eq!(value["metadata"], "b3BhcXVl");
        assert!(value["createdAt"].is_i64());
        assert!(value["updatedAt"].is_i64());

        let back: ResourceRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_json_metadata_helpers() {
        let record = ResourceRecord::new("q-1", "queue", "jobs")
            .with_json_metadata(&json!({"region": "eu-west-1", "fifo": true}))
            .unwrap();
        let meta: serde_json::Value = record.metadata_json().unwrap();
        assert_eq!(meta["region"], "eu-west-1");
        assert_eq!(meta["fifo"], true);
    }

    #[test]
    fn test_state_document_shape() {
        let mut state = ScopeState::empty();
        state
            .resources
            .insert("db".to_string(), ResourceRecord::new("db-1", "postgres", "db"));
        state.nested_scopes.insert("workers".to_string());
        state.touch();

        let value: serde_json::Value = serde_json::from_slice(&state.to_vec().unwrap()).unwrap();
        assert_eq!(value["schemaVersion"], 1);
        assert_eq!(value["nestedScopes"], json!(["workers"]));
        assert!(value["resources"]["db"].is_object());
        assert!(value["updatedAt"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_touch_strictly_increases() {
        let mut state = ScopeState::empty();
        state.touch();
        let first = state.updated_at;
        state.touch();
        assert!(state.updated_at > first);

        // A clock far in the future must still be exceeded.
        state.updated_at = DateTime::from_timestamp_millis(32_503_680_000_000).unwrap();
        let future = state.updated_at;
        state.touch();
        assert_eq!(
            state.updated_at.timestamp_millis(),
            future.timestamp_millis() + 1
        );
    }

    #[test]
    fn test_from_slice_garbage_is_corrupted() {
        let err = ScopeState::from_slice("a/b/state.json", b"\x00\x01not json").unwrap_err();
        assert_eq!(err.error_code(), "CORRUPTED");
    }

    #[test]
    fn test_from_slice_rejects_newer_schema() {
        let doc = json!({
            "schemaVersion": 99,
            "resources": {},
            "nestedScopes": [],
            "updatedAt": 1
        });
        let err =
            ScopeState::from_slice("a/b/state.json", doc.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, ScopeError::Corrupted { .. }));
    }

    #[test]
    fn test_key_for_id() {
        let mut state = ScopeState::empty();
        state
            .resources
            .insert("api".to_string(), ResourceRecord::new("fn-9", "lambda", "api"));
        assert_eq!(state.key_for_id("fn-9"), Some("api"));
        assert_eq!(state.key_for_id("fn-10"), None);
    }
}

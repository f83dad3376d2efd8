use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Event Metadata - Typed Envelope Mapping
// ============================================================================
//
// Every event payload travels with an ordered string-to-string mapping of
// envelope metadata. A small set of well-known keys is required at the
// commit boundary; everything else is carried through untouched.
//
// ============================================================================

/// Well-known metadata keys.
pub mod keys {
    /// Globally unique event id (UUID). Used by the remote commit-log
    /// backend for idempotent dedup of retried appends.
    pub const EVENT_ID: &str = "event_id";
    /// Stable event-type name.
    pub const EVENT_NAME: &str = "event_name";
    /// Event schema version.
    pub const EVENT_VERSION: &str = "event_version";
    /// Type name of the owning aggregate.
    pub const AGGREGATE_NAME: &str = "aggregate_name";
    /// Stream key, when the producer chose to embed it.
    pub const AGGREGATE_ID: &str = "aggregate_id";
    /// Position within the stream, when the producer chose to embed it.
    pub const AGGREGATE_SEQUENCE_NUMBER: &str = "aggregate_sequence_number";
    /// Groups events committed in the same call. Traceability only.
    pub const BATCH_ID: &str = "batch_id";
    /// RFC 3339 wall-clock time the event was produced.
    pub const TIMESTAMP: &str = "timestamp";
}

/// Keys that must be present (and parse) before a batch may commit.
const REQUIRED_KEYS: [&str; 4] = [
    keys::EVENT_ID,
    keys::EVENT_NAME,
    keys::EVENT_VERSION,
    keys::AGGREGATE_NAME,
];

/// Ordered metadata mapping carried alongside every event payload.
///
/// Immutable once committed; builder-style `with_*` methods assemble it
/// beforehand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventMetadata(BTreeMap<String, String>);

impl EventMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an arbitrary key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn with_event_id(self, event_id: Uuid) -> Self {
        self.with(keys::EVENT_ID, event_id.to_string())
    }

    pub fn with_event_name(self, event_name: impl Into<String>) -> Self {
        self.with(keys::EVENT_NAME, event_name)
    }

    pub fn with_event_version(self, event_version: u32) -> Self {
        self.with(keys::EVENT_VERSION, event_version.to_string())
    }

    pub fn with_aggregate_name(self, aggregate_name: impl Into<String>) -> Self {
        self.with(keys::AGGREGATE_NAME, aggregate_name)
    }

    pub fn with_batch_id(self, batch_id: Uuid) -> Self {
        self.with(keys::BATCH_ID, batch_id.to_string())
    }

    /// Stamp `timestamp` with the current wall-clock time.
    pub fn with_timestamp_now(self) -> Self {
        self.with(keys::TIMESTAMP, Utc::now().to_rfc3339())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn event_id(&self) -> Option<Uuid> {
        self.get(keys::EVENT_ID).and_then(|v| Uuid::parse_str(v).ok())
    }

    pub fn event_name(&self) -> Option<&str> {
        self.get(keys::EVENT_NAME)
    }

    pub fn event_version(&self) -> Option<u32> {
        self.get(keys::EVENT_VERSION).and_then(|v| v.parse().ok())
    }

    pub fn aggregate_name(&self) -> Option<&str> {
        self.get(keys::AGGREGATE_NAME)
    }

    pub fn batch_id(&self) -> Option<Uuid> {
        self.get(keys::BATCH_ID).and_then(|v| Uuid::parse_str(v).ok())
    }

    /// Check the required keys are present and well-formed. Called once per
    /// event at the commit boundary; the error names the offending key.
    pub fn validate_required(&self) -> Result<(), String> {
        for key in REQUIRED_KEYS {
            match self.get(key) {
                None | Some("") => return Err(format!("missing required metadata key '{key}'")),
                Some(_) => {}
            }
        }
        if self.event_id().is_none() {
            return Err(format!("metadata key '{}' is not a valid UUID", keys::EVENT_ID));
        }
        if self.event_version().is_none() {
            return Err(format!(
                "metadata key '{}' is not a valid version number",
                keys::EVENT_VERSION
            ));
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Aggregate Identity - Opaque Stream Key
// ============================================================================
//
// The store treats aggregate identifiers as opaque stream keys. Shape
// validation (prefixes, embedded UUIDs, casing rules) belongs to the owning
// aggregate type upstream; down here an id only names a stream.
//
// ============================================================================

/// Identifier of one aggregate stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(String);

impl AggregateId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AggregateId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AggregateId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_id_is_an_opaque_string() {
        let id = AggregateId::new("order-4a6d9c");
        assert_eq!(id.as_str(), "order-4a6d9c");
        assert_eq!(id.to_string(), "order-4a6d9c");
    }

    #[test]
    fn test_aggregate_id_equality_is_by_value() {
        assert_eq!(AggregateId::from("a"), AggregateId::new("a"));
        assert_ne!(AggregateId::from("a"), AggregateId::from("b"));
    }
}

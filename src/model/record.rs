use serde::{Deserialize, Serialize};

use super::identity::AggregateId;
use super::metadata::EventMetadata;

// ============================================================================
// Event Records - Pre-Commit and Durable Forms
// ============================================================================
//
// Callers hand the store sequence-stamped, serialized events; the store
// hands back durable records with backend-assigned global ordering. Records
// are created once at commit time and never change afterwards.
//
// ============================================================================

/// An event the caller wants committed: payload and metadata serialized,
/// position within its stream already assigned, global ordering not yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncommittedEvent {
    /// 1-based position within the owning stream. A batch must be
    /// contiguous, starting right after the stream's current version.
    pub aggregate_sequence_number: u64,
    /// Opaque serialized event payload.
    pub data: String,
    /// Envelope metadata. Validated at the commit boundary.
    pub metadata: EventMetadata,
}

impl UncommittedEvent {
    pub fn new(aggregate_sequence_number: u64, data: impl Into<String>, metadata: EventMetadata) -> Self {
        Self {
            aggregate_sequence_number,
            data: data.into(),
            metadata,
        }
    }
}

/// One durable event record, as returned by every read operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedEvent {
    /// Stream key of the owning aggregate.
    pub aggregate_id: AggregateId,
    /// 1-based position within the owning stream. For a stream with N
    /// committed events the numbers are exactly 1..=N.
    pub aggregate_sequence_number: u64,
    /// Backend-assigned position in the global feed. Strictly increasing,
    /// never reused. `None` for the remote commit-log backend, whose global
    /// order is the service's native position pair and is surfaced through
    /// the page cursor instead.
    pub global_sequence_number: Option<u64>,
    /// Opaque serialized event payload, exactly as committed.
    pub data: String,
    /// Serialized envelope metadata, exactly as committed.
    pub metadata: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncommitted_event_carries_the_callers_sequence_number() {
        let event = UncommittedEvent::new(3, r#"{"qty":2}"#, EventMetadata::new());
        assert_eq!(event.aggregate_sequence_number, 3);
        assert_eq!(event.data, r#"{"qty":2}"#);
    }

    #[test]
    fn test_committed_event_serializes_and_restores() {
        let record = CommittedEvent {
            aggregate_id: AggregateId::new("order-1"),
            aggregate_sequence_number: 1,
            global_sequence_number: Some(42),
            data: "{}".to_string(),
            metadata: "{}".to_string(),
        };

        let json = serde_json::to_string(&record).expect("serializes");
        let restored: CommittedEvent = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(restored, record);
    }
}

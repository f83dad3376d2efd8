use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::model::{AggregateId, CommittedEvent, GlobalPosition, UncommittedEvent};

// ============================================================================
// Persistence Contract - Uniform Backend Interface
// ============================================================================
//
// The operation set every storage adapter implements. Backends differ in
// where durability and global ordering come from; the contract, the
// invariants, and the error taxonomy are identical across all of them.
//
// ============================================================================

/// One page of the globally-ordered all-events feed, plus the cursor to
/// resume from. The cursor is valid even when the page is empty (end of
/// feed): polling with it again picks up whatever commits next.
#[derive(Debug, Clone)]
pub struct AllCommittedEventsPage {
    pub next_position: GlobalPosition,
    pub events: Vec<CommittedEvent>,
}

impl AllCommittedEventsPage {
    pub fn new(next_position: GlobalPosition, events: Vec<CommittedEvent>) -> Self {
        Self { next_position, events }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Uniform persistence contract over an append-only event store.
///
/// All operations are async and non-blocking. Cancellation is dropping the
/// in-flight future; a dropped commit may nonetheless have become durable,
/// so callers must treat it as unknown outcome and reload before retrying.
#[async_trait]
pub trait EventPersistence: Send + Sync {
    /// Commit a batch of events to one stream, atomically.
    ///
    /// The batch encodes its own expected prior stream version: one less
    /// than its lowest sequence number. If the backend's recorded version
    /// differs, the whole commit fails with
    /// [`PersistenceError::OptimisticConcurrency`] and nothing is written.
    /// An empty batch is a successful no-op.
    ///
    /// Returns the committed records with backend-assigned global ordering.
    async fn commit_events(
        &self,
        id: &AggregateId,
        events: &[UncommittedEvent],
    ) -> Result<Vec<CommittedEvent>, PersistenceError>;

    /// Load the complete history of one stream, ascending by aggregate
    /// sequence number. Unknown or deleted streams yield an empty vec.
    async fn load_events(&self, id: &AggregateId) -> Result<Vec<CommittedEvent>, PersistenceError>;

    /// Load up to `page_size` domain events from the global feed at or
    /// after `position`, in ascending global order, skipping any
    /// backend-internal streams. The returned cursor resumes exactly after
    /// the last delivered event and never re-delivers or skips.
    async fn load_all_committed_events(
        &self,
        position: &GlobalPosition,
        page_size: usize,
    ) -> Result<AllCommittedEventsPage, PersistenceError>;

    /// Remove every record of one stream. Global sequence numbers are not
    /// reclaimed. Deleting an unknown or already-deleted stream succeeds.
    async fn delete_events(&self, id: &AggregateId) -> Result<(), PersistenceError>;
}

/// Expected prior stream version encoded by a batch: one less than its
/// lowest aggregate sequence number. Only meaningful for non-empty,
/// validated batches.
pub fn expected_version(events: &[UncommittedEvent]) -> u64 {
    events
        .iter()
        .map(|e| e.aggregate_sequence_number)
        .min()
        .unwrap_or(1)
        .saturating_sub(1)
}

/// Commit-boundary validation shared by every backend. Checks the batch is
/// contiguous and ascending from its own expected version, and that each
/// event carries the required metadata. Fails fast before the medium is
/// touched. Callers handle the empty batch earlier (it is a no-op, not an
/// error).
pub(crate) fn validate_batch(
    id: &AggregateId,
    events: &[UncommittedEvent],
) -> Result<(), PersistenceError> {
    if id.as_str().is_empty() {
        return Err(PersistenceError::InvalidEventBatch(
            "aggregate id must not be empty".to_string(),
        ));
    }

    let first = events[0].aggregate_sequence_number;
    if first == 0 {
        return Err(PersistenceError::InvalidEventBatch(
            "aggregate sequence numbers are 1-based".to_string(),
        ));
    }

    for (offset, event) in events.iter().enumerate() {
        let expected = first + offset as u64;
        if event.aggregate_sequence_number != expected {
            return Err(PersistenceError::InvalidEventBatch(format!(
                "batch is not contiguous: found sequence number {} where {} was expected",
                event.aggregate_sequence_number, expected
            )));
        }
        event
            .metadata
            .validate_required()
            .map_err(PersistenceError::InvalidEventBatch)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventMetadata;
    use uuid::Uuid;

    fn metadata() -> EventMetadata {
        EventMetadata::new()
            .with_event_id(Uuid::new_v4())
            .with_event_name("ThingHappened")
            .with_event_version(1)
            .with_aggregate_name("Thing")
    }

    fn batch(sequence_numbers: &[u64]) -> Vec<UncommittedEvent> {
        sequence_numbers
            .iter()
            .map(|&n| UncommittedEvent::new(n, "{}", metadata()))
            .collect()
    }

    #[test]
    fn test_expected_version_is_one_below_the_lowest_sequence_number() {
        assert_eq!(expected_version(&batch(&[1, 2, 3])), 0);
        assert_eq!(expected_version(&batch(&[4, 5])), 3);
    }

    #[test]
    fn test_contiguous_batch_passes_validation() {
        assert!(validate_batch(&AggregateId::new("a"), &batch(&[3, 4, 5])).is_ok());
    }

    #[test]
    fn test_batch_with_a_gap_is_rejected() {
        let err = validate_batch(&AggregateId::new("a"), &batch(&[1, 3])).expect_err("gap");
        assert!(matches!(err, PersistenceError::InvalidEventBatch(_)));
    }

    #[test]
    fn test_batch_with_a_duplicate_is_rejected() {
        let err = validate_batch(&AggregateId::new("a"), &batch(&[2, 2])).expect_err("duplicate");
        assert!(matches!(err, PersistenceError::InvalidEventBatch(_)));
    }

    #[test]
    fn test_zero_based_batch_is_rejected() {
        let err = validate_batch(&AggregateId::new("a"), &batch(&[0, 1])).expect_err("zero");
        assert!(matches!(err, PersistenceError::InvalidEventBatch(_)));
    }

    #[test]
    fn test_missing_metadata_is_rejected_at_the_boundary() {
        let events = vec![UncommittedEvent::new(1, "{}", EventMetadata::new())];
        let err = validate_batch(&AggregateId::new("a"), &events).expect_err("no metadata");
        assert!(matches!(err, PersistenceError::InvalidEventBatch(_)));
    }
}

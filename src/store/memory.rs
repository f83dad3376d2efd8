use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::error::PersistenceError;
use crate::model::{AggregateId, CommittedEvent, GlobalPosition, UncommittedEvent};
use crate::store::contract::{
    expected_version, validate_batch, AllCommittedEventsPage, EventPersistence,
};

// ============================================================================
// In-Memory Backend
// ============================================================================
//
// Keeps every stream in a mutex-guarded map. Commit-versus-commit races on
// one stream resolve under the lock, so exactly one writer wins. Useful for
// tests and local development; also the reference semantics the durable
// backends are checked against.
//
// ============================================================================

#[derive(Default)]
struct InMemoryState {
    streams: HashMap<String, Vec<CommittedEvent>>,
    global_sequence_number: u64,
}

/// Volatile, process-local event persistence.
#[derive(Default)]
pub struct InMemoryEventPersistence {
    state: Mutex<InMemoryState>,
}

impl InMemoryEventPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl EventPersistence for InMemoryEventPersistence {
    async fn commit_events(
        &self,
        id: &AggregateId,
        events: &[UncommittedEvent],
    ) -> Result<Vec<CommittedEvent>, PersistenceError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        validate_batch(id, events)?;

        // Serialize metadata up front so a failure cannot leave a partial
        // batch behind.
        let mut pending = Vec::with_capacity(events.len());
        for event in events {
            pending.push((event, event.metadata.to_json()?));
        }

        let expected = expected_version(events);
        let mut state = self.state.lock().await;

        let current = state
            .streams
            .get(id.as_str())
            .map(|stream| stream.len() as u64)
            .unwrap_or(0);
        if current != expected {
            return Err(PersistenceError::OptimisticConcurrency {
                aggregate_id: id.to_string(),
                details: format!("expected version {expected}, but stream is at {current}"),
            });
        }

        let mut committed = Vec::with_capacity(events.len());
        for (event, metadata) in pending {
            state.global_sequence_number += 1;
            committed.push(CommittedEvent {
                aggregate_id: id.clone(),
                aggregate_sequence_number: event.aggregate_sequence_number,
                global_sequence_number: Some(state.global_sequence_number),
                data: event.data.clone(),
                metadata,
            });
        }

        state
            .streams
            .entry(id.as_str().to_string())
            .or_default()
            .extend(committed.iter().cloned());

        tracing::debug!(
            aggregate_id = %id,
            event_count = committed.len(),
            new_version = current + committed.len() as u64,
            "Committed events to in-memory store"
        );

        Ok(committed)
    }

    async fn load_events(&self, id: &AggregateId) -> Result<Vec<CommittedEvent>, PersistenceError> {
        let state = self.state.lock().await;
        Ok(state.streams.get(id.as_str()).cloned().unwrap_or_default())
    }

    async fn load_all_committed_events(
        &self,
        position: &GlobalPosition,
        page_size: usize,
    ) -> Result<AllCommittedEventsPage, PersistenceError> {
        let from = position.to_sequence(1)?;
        let state = self.state.lock().await;

        let mut events: Vec<CommittedEvent> = state
            .streams
            .values()
            .flatten()
            .filter(|e| e.global_sequence_number.unwrap_or(0) >= from)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.global_sequence_number);
        events.truncate(page_size);

        let next = events
            .iter()
            .filter_map(|e| e.global_sequence_number)
            .max()
            .map(|max| max + 1)
            .unwrap_or(from);

        Ok(AllCommittedEventsPage::new(GlobalPosition::from(next), events))
    }

    async fn delete_events(&self, id: &AggregateId) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        let removed = state.streams.remove(id.as_str());
        tracing::debug!(
            aggregate_id = %id,
            event_count = removed.map(|r| r.len()).unwrap_or(0),
            "Deleted stream from in-memory store"
        );
        Ok(())
    }
}

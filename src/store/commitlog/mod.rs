use crate::error::PersistenceError;
use crate::model::metadata::keys;
use crate::model::{AggregateId, CommittedEvent, GlobalPosition, UncommittedEvent};
use crate::store::contract::{
    expected_version, validate_batch, AllCommittedEventsPage, EventPersistence,
};

mod client;
mod esdb;

pub use client::{
    AllLogSlice, CommitLogClient, CommitLogError, LogEventData, LogExpectedRevision, LogPosition,
    RecordedLogEvent, StreamLogSlice,
};
pub use esdb::EsdbCommitLogClient;

// ============================================================================
// Remote Commit-Log Backend
// ============================================================================
//
// Ordering and durability live in an external append-only log service; this
// layer translates the persistence contract onto the service's native
// primitives. Stream name = aggregate id, event type =
// "{aggregate_name}.{event_name}.{event_version}", event identity = the
// event_id metadata UUID. The global feed cursor is the service's
// commit/prepare position pair, carried as a "commit-prepare" string.
//
// ============================================================================

/// Streams the service keeps for itself share this prefix; they never carry
/// domain events and the global feed skips them.
const SYSTEM_STREAM_PREFIX: char = '$';

/// How many events one internal stream-read round trip asks for.
const STREAM_SLICE_SIZE: usize = 200;

fn decode_position(position: &GlobalPosition) -> Result<LogPosition, PersistenceError> {
    let Some(value) = position.value() else {
        return Ok(LogPosition::Start);
    };

    let malformed = |reason: String| PersistenceError::MalformedPosition {
        value: value.to_string(),
        reason,
    };

    let mut parts = value.split('-');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(commit), Some(prepare), None) => {
            let commit = commit
                .parse::<u64>()
                .map_err(|e| malformed(format!("commit offset is not an integer: {e}")))?;
            let prepare = prepare
                .parse::<u64>()
                .map_err(|e| malformed(format!("prepare offset is not an integer: {e}")))?;
            Ok(LogPosition::Position { commit, prepare })
        }
        _ => Err(malformed(
            "expected the empty string or 'commit-prepare'".to_string(),
        )),
    }
}

fn encode_position(position: LogPosition) -> GlobalPosition {
    match position {
        LogPosition::Start => GlobalPosition::start(),
        LogPosition::Position { commit, prepare } => {
            GlobalPosition::from_value(format!("{commit}-{prepare}"))
        }
    }
}

fn into_committed(event: RecordedLogEvent) -> CommittedEvent {
    CommittedEvent {
        aggregate_id: AggregateId::new(event.stream_id),
        // Service revisions are 0-based.
        aggregate_sequence_number: event.revision + 1,
        global_sequence_number: None,
        data: event.data,
        metadata: event.metadata,
    }
}

/// Event persistence over an external commit log service.
pub struct CommitLogEventPersistence<C> {
    client: C,
}

impl<C: CommitLogClient> CommitLogEventPersistence<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl<C: CommitLogClient> EventPersistence for CommitLogEventPersistence<C> {
    async fn commit_events(
        &self,
        id: &AggregateId,
        events: &[UncommittedEvent],
    ) -> Result<Vec<CommittedEvent>, PersistenceError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        validate_batch(id, events)?;

        let mut committed = Vec::with_capacity(events.len());
        let mut event_datas = Vec::with_capacity(events.len());
        for event in events {
            let metadata = event.metadata.to_json()?;
            let event_id = event.metadata.event_id().ok_or_else(|| {
                PersistenceError::InvalidEventBatch(format!(
                    "missing required metadata key '{}'",
                    keys::EVENT_ID
                ))
            })?;
            let event_type = format!(
                "{}.{}.{}",
                event.metadata.aggregate_name().unwrap_or_default(),
                event.metadata.event_name().unwrap_or_default(),
                event.metadata.event_version().unwrap_or_default(),
            );

            event_datas.push(LogEventData {
                id: event_id,
                event_type,
                data: event.data.clone(),
                metadata: metadata.clone(),
            });
            committed.push(CommittedEvent {
                aggregate_id: id.clone(),
                aggregate_sequence_number: event.aggregate_sequence_number,
                global_sequence_number: None,
                data: event.data.clone(),
                metadata,
            });
        }

        let expected = expected_version(events);
        let expected_revision = if expected == 0 {
            LogExpectedRevision::NoStream
        } else {
            // 1-based stream version to 0-based service revision.
            LogExpectedRevision::Exact(expected - 1)
        };

        match self.client.append(id.as_str(), expected_revision, event_datas).await {
            Ok(()) => {}
            Err(CommitLogError::WrongExpectedVersion { details, .. }) => {
                return Err(PersistenceError::OptimisticConcurrency {
                    aggregate_id: id.to_string(),
                    details,
                });
            }
            Err(error) => return Err(error.into()),
        }

        tracing::debug!(
            aggregate_id = %id,
            event_count = committed.len(),
            "Committed events to commit log"
        );

        Ok(committed)
    }

    async fn load_events(&self, id: &AggregateId) -> Result<Vec<CommittedEvent>, PersistenceError> {
        let mut committed = Vec::new();
        let mut revision = 0u64;

        loop {
            let slice = match self.client.read_stream(id.as_str(), revision, STREAM_SLICE_SIZE).await
            {
                Ok(slice) => slice,
                Err(CommitLogError::StreamNotFound { .. }) => return Ok(Vec::new()),
                Err(error) => return Err(error.into()),
            };
            revision = slice.next_revision;
            committed.extend(slice.events.into_iter().map(into_committed));
            if slice.is_end_of_stream {
                break;
            }
        }

        Ok(committed)
    }

    async fn load_all_committed_events(
        &self,
        position: &GlobalPosition,
        page_size: usize,
    ) -> Result<AllCommittedEventsPage, PersistenceError> {
        let mut position = decode_position(position)?;
        let mut events: Vec<CommittedEvent> = Vec::new();

        // One service round trip can come back short of domain events when
        // system-stream entries are interleaved; keep scanning until the
        // page is full or the log runs out.
        while events.len() < page_size {
            let slice = self.client.read_all(position, page_size - events.len()).await?;
            position = slice.next_position;
            events.extend(
                slice
                    .events
                    .into_iter()
                    .filter(|e| !e.stream_id.starts_with(SYSTEM_STREAM_PREFIX))
                    .map(into_committed),
            );
            if slice.is_end_of_log {
                break;
            }
        }

        Ok(AllCommittedEventsPage::new(encode_position(position), events))
    }

    async fn delete_events(&self, id: &AggregateId) -> Result<(), PersistenceError> {
        match self.client.delete_stream(id.as_str()).await {
            Ok(()) => {
                tracing::debug!(aggregate_id = %id, "Deleted stream from commit log");
                Ok(())
            }
            Err(CommitLogError::StreamNotFound { .. }) => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

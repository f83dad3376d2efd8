use async_trait::async_trait;
use eventstore::{
    AppendToStreamOptions, Client, ClientSettings, DeleteStreamOptions, EventData,
    ExpectedRevision, Position, ReadAllOptions, ReadStreamOptions, StreamPosition,
};

use crate::error::PersistenceError;

use super::client::{
    AllLogSlice, CommitLogClient, CommitLogError, LogEventData, LogExpectedRevision, LogPosition,
    RecordedLogEvent, StreamLogSlice,
};

// ============================================================================
// EventStoreDB / KurrentDB Adapter
// ============================================================================
//
// Concrete commit log client over the `eventstore` gRPC client. The service
// deduplicates retried appends by event id, and its $all reads resolve a
// between-records position to the next record at or after it, which is what
// makes the +1 resume offsets below safe.
//
// ============================================================================

fn transport(error: eventstore::Error) -> CommitLogError {
    CommitLogError::Transport(Box::new(error))
}

fn to_native_position(position: LogPosition) -> StreamPosition<Position> {
    match position {
        LogPosition::Start => StreamPosition::Start,
        LogPosition::Position { commit, prepare } => {
            StreamPosition::Position(Position { commit, prepare })
        }
    }
}

/// Position to resume an $all read from, just past the last event of a
/// slice. Falls back to the requested position for an empty slice.
fn position_after(events: &[RecordedLogEvent], requested: LogPosition) -> LogPosition {
    match events.last().map(|e| e.position) {
        Some(LogPosition::Position { commit, prepare }) => LogPosition::Position {
            commit: commit + 1,
            prepare: prepare + 1,
        },
        _ => requested,
    }
}

/// Commit log client for an EventStoreDB/KurrentDB-protocol service.
pub struct EsdbCommitLogClient {
    client: Client,
}

impl EsdbCommitLogClient {
    /// Connect using an `esdb://` connection string.
    pub fn connect(connection_string: &str) -> Result<Self, PersistenceError> {
        let settings: ClientSettings = connection_string.parse().map_err(|error| {
            PersistenceError::Configuration(format!(
                "invalid commit log connection string: {error}"
            ))
        })?;
        let client = Client::new(settings)
            .map_err(|error| PersistenceError::Configuration(error.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an already-configured client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CommitLogClient for EsdbCommitLogClient {
    async fn append(
        &self,
        stream: &str,
        expected: LogExpectedRevision,
        events: Vec<LogEventData>,
    ) -> Result<(), CommitLogError> {
        let expected_revision = match expected {
            LogExpectedRevision::NoStream => ExpectedRevision::NoStream,
            LogExpectedRevision::Exact(revision) => ExpectedRevision::Exact(revision),
        };
        let options = AppendToStreamOptions::default().expected_revision(expected_revision);

        let mut event_datas = Vec::with_capacity(events.len());
        for event in events {
            // Envelope metadata is always JSON; carrying it verbatim keeps
            // the stored form byte-identical to the committed one.
            let metadata = serde_json::value::RawValue::from_string(event.metadata)
                .map_err(|error| CommitLogError::Transport(Box::new(error)))?;
            let event_data = EventData::binary(event.event_type, event.data.into_bytes().into())
                .id(event.id)
                .metadata_as_json(&metadata)
                .map_err(|error| CommitLogError::Transport(Box::new(error)))?;
            event_datas.push(event_data);
        }

        match self.client.append_to_stream(stream, &options, event_datas).await {
            Ok(_) => Ok(()),
            Err(eventstore::Error::WrongExpectedVersion { expected, current }) => {
                Err(CommitLogError::WrongExpectedVersion {
                    stream: stream.to_string(),
                    details: format!("expected {expected:?}, current {current:?}"),
                })
            }
            Err(error) => Err(transport(error)),
        }
    }

    async fn read_all(
        &self,
        position: LogPosition,
        max_count: usize,
    ) -> Result<AllLogSlice, CommitLogError> {
        let options = ReadAllOptions::default()
            .position(to_native_position(position))
            .forwards()
            .max_count(max_count);

        let mut stream = self.client.read_all(&options).await.map_err(transport)?;
        let mut events = Vec::new();
        while let Some(resolved) = stream.next().await.map_err(transport)? {
            let event = resolved.get_original_event();
            events.push(RecordedLogEvent {
                stream_id: event.stream_id.clone(),
                revision: event.revision,
                position: LogPosition::Position {
                    commit: event.position.commit,
                    prepare: event.position.prepare,
                },
                data: String::from_utf8_lossy(&event.data).into_owned(),
                metadata: String::from_utf8_lossy(&event.custom_metadata).into_owned(),
            });
        }

        Ok(AllLogSlice {
            is_end_of_log: events.len() < max_count,
            next_position: position_after(&events, position),
            events,
        })
    }

    async fn read_stream(
        &self,
        stream: &str,
        revision: u64,
        max_count: usize,
    ) -> Result<StreamLogSlice, CommitLogError> {
        let options = ReadStreamOptions::default()
            .position(StreamPosition::Position(revision))
            .forwards()
            .max_count(max_count);

        let mut read = match self.client.read_stream(stream, &options).await {
            Ok(read) => read,
            Err(eventstore::Error::ResourceNotFound) => {
                return Err(CommitLogError::StreamNotFound {
                    stream: stream.to_string(),
                })
            }
            Err(error) => return Err(transport(error)),
        };

        let mut events = Vec::new();
        loop {
            match read.next().await {
                Ok(Some(resolved)) => {
                    let event = resolved.get_original_event();
                    events.push(RecordedLogEvent {
                        stream_id: event.stream_id.clone(),
                        revision: event.revision,
                        position: LogPosition::Position {
                            commit: event.position.commit,
                            prepare: event.position.prepare,
                        },
                        data: String::from_utf8_lossy(&event.data).into_owned(),
                        metadata: String::from_utf8_lossy(&event.custom_metadata).into_owned(),
                    });
                }
                Ok(None) => break,
                Err(eventstore::Error::ResourceNotFound) => {
                    return Err(CommitLogError::StreamNotFound {
                        stream: stream.to_string(),
                    })
                }
                Err(error) => return Err(transport(error)),
            }
        }

        let next_revision = events.last().map(|e| e.revision + 1).unwrap_or(revision);
        Ok(StreamLogSlice {
            is_end_of_stream: events.len() < max_count,
            next_revision,
            events,
        })
    }

    async fn delete_stream(&self, stream: &str) -> Result<(), CommitLogError> {
        match self.client.delete_stream(stream, &DeleteStreamOptions::default()).await {
            Ok(_) => Ok(()),
            Err(eventstore::Error::ResourceNotFound) => Err(CommitLogError::StreamNotFound {
                stream: stream.to_string(),
            }),
            Err(error) => Err(transport(error)),
        }
    }
}

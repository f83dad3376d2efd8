use async_trait::async_trait;
use uuid::Uuid;

// ============================================================================
// Commit Log Client - Native Service Primitives
// ============================================================================
//
// The narrow surface the remote backend needs from an append-only log
// service: per-stream appends guarded by an expected-revision token, a
// global forward scan addressed by commit/prepare position pairs, a
// per-stream forward scan, and stream deletion. Concrete adapters sit
// behind this trait; the translation layer and its tests only see it.
//
// ============================================================================

/// Position of an entry in the service's global log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogPosition {
    /// Beginning of the log.
    Start,
    /// A concrete commit/prepare offset pair.
    Position { commit: u64, prepare: u64 },
}

/// Stream state an append is conditioned on. Revisions are the service's:
/// 0-based, unlike the 1-based aggregate sequence numbers above this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogExpectedRevision {
    /// The stream must not exist yet.
    NoStream,
    /// The stream's last event must be at exactly this revision.
    Exact(u64),
}

/// One event to append, in the service's native shape.
#[derive(Debug, Clone)]
pub struct LogEventData {
    /// Globally unique event id; the service deduplicates retried appends
    /// carrying the same id.
    pub id: Uuid,
    /// Fully qualified event type name.
    pub event_type: String,
    /// Serialized event payload.
    pub data: String,
    /// Serialized envelope metadata.
    pub metadata: String,
}

/// One event as recorded by the service.
#[derive(Debug, Clone)]
pub struct RecordedLogEvent {
    /// Stream the event was appended to.
    pub stream_id: String,
    /// 0-based position within its stream.
    pub revision: u64,
    /// Position in the global log.
    pub position: LogPosition,
    pub data: String,
    pub metadata: String,
}

/// A slice of the global log, oldest first.
#[derive(Debug, Clone)]
pub struct AllLogSlice {
    pub events: Vec<RecordedLogEvent>,
    /// Position to resume from after the returned events. Equal to the
    /// requested position when the slice is empty.
    pub next_position: LogPosition,
    pub is_end_of_log: bool,
}

/// A slice of one stream, oldest first.
#[derive(Debug, Clone)]
pub struct StreamLogSlice {
    pub events: Vec<RecordedLogEvent>,
    /// Revision to resume from after the returned events.
    pub next_revision: u64,
    pub is_end_of_stream: bool,
}

/// Failure surface of a commit log service.
#[derive(Debug, thiserror::Error)]
pub enum CommitLogError {
    /// The stream was not at the expected revision. Nothing was appended.
    #[error("wrong expected version on stream '{stream}': {details}")]
    WrongExpectedVersion { stream: String, details: String },

    /// The addressed stream does not exist.
    #[error("stream '{stream}' not found")]
    StreamNotFound { stream: String },

    /// Network or service fault, propagated unchanged.
    #[error("commit log transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Client for an external append-only commit log service.
#[async_trait]
pub trait CommitLogClient: Send + Sync {
    /// Append `events` to `stream` as one transaction, conditioned on
    /// `expected`. All events land or none do.
    async fn append(
        &self,
        stream: &str,
        expected: LogExpectedRevision,
        events: Vec<LogEventData>,
    ) -> Result<(), CommitLogError>;

    /// Read up to `max_count` entries of the global log at or after
    /// `position`, oldest first. Includes service-internal streams; the
    /// caller filters.
    async fn read_all(
        &self,
        position: LogPosition,
        max_count: usize,
    ) -> Result<AllLogSlice, CommitLogError>;

    /// Read up to `max_count` events of one stream, starting at the 0-based
    /// `revision`.
    async fn read_stream(
        &self,
        stream: &str,
        revision: u64,
        max_count: usize,
    ) -> Result<StreamLogSlice, CommitLogError>;

    /// Delete a stream regardless of its current revision.
    async fn delete_stream(&self, stream: &str) -> Result<(), CommitLogError>;
}

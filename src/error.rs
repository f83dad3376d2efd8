// ============================================================================
// Persistence Error Taxonomy
// ============================================================================
//
// Four kinds matter to callers: a concurrency violation on commit (retry
// after reload), a malformed feed position (caller bug), a rejected batch
// (caller bug), and backing-medium faults (propagated unchanged, retry
// policy belongs upstream). Absence of a stream is never an error; loads
// return empty and deletes succeed.
//
// ============================================================================

/// Error kind surfaced by every store operation.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Another writer already occupies one of the stream slots this batch
    /// targeted. The store is unchanged; reload the stream and retry.
    #[error("optimistic concurrency violation on stream '{aggregate_id}': {details}")]
    OptimisticConcurrency { aggregate_id: String, details: String },

    /// A feed position that this backend type did not produce.
    #[error("malformed global position '{value}': {reason}")]
    MalformedPosition { value: String, reason: String },

    /// The batch failed commit-boundary validation: sequence numbers not
    /// contiguous, or required metadata missing.
    #[error("invalid event batch: {0}")]
    InvalidEventBatch(String),

    /// Backend configuration that could not be applied (bad connection
    /// string, unusable store path).
    #[error("invalid store configuration: {0}")]
    Configuration(String),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("database failure: {0}")]
    Database(#[from] sqlx::Error),

    #[error("commit log failure: {0}")]
    Remote(#[from] crate::store::commitlog::CommitLogError),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PersistenceError {
    /// True for the one error kind that is safe to retry after reloading
    /// the stream. Callers branch on this, never on message text.
    pub fn is_concurrency_violation(&self) -> bool {
        matches!(self, Self::OptimisticConcurrency { .. })
    }
}

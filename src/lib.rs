// ============================================================================
// eventledger - Append-Only Event Persistence
// ============================================================================
//
// An event-sourcing persistence engine: immutable domain events, organized
// per aggregate stream, behind one backend-agnostic contract with
// interchangeable storage adapters (in-memory, file tree, Postgres, remote
// commit log). Commits are atomic per batch and guarded by optimistic
// concurrency; the global feed is totally ordered and resumable through an
// opaque cursor.
//
// Aggregate rehydration, command handling and read-model projection live
// above this crate and consume it through the EventPersistence trait.
//
// ============================================================================

pub mod error;
pub mod model;
pub mod store;

pub use error::PersistenceError;
pub use model::{AggregateId, CommittedEvent, EventMetadata, GlobalPosition, UncommittedEvent};
pub use store::{
    AllCommittedEventsPage, CommitLogEventPersistence, EsdbCommitLogClient, EventPersistence,
    FilesEventPersistence, FilesStoreConfig, InMemoryEventPersistence, PostgresEventPersistence,
};

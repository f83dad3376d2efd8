// ============================================================================
// Storage Adapters
// ============================================================================
//
// Interchangeable implementations of the persistence contract. Each backend
// sources durability and global ordering differently; all honor the same
// commit protocol, feed semantics and error taxonomy.
//
// ============================================================================

pub mod commitlog;
pub mod contract;
pub mod files;
pub mod memory;
pub mod postgres;

pub use commitlog::{CommitLogEventPersistence, EsdbCommitLogClient};
pub use contract::{expected_version, AllCommittedEventsPage, EventPersistence};
pub use files::{FilesEventPersistence, FilesStoreConfig};
pub use memory::InMemoryEventPersistence;
pub use postgres::PostgresEventPersistence;

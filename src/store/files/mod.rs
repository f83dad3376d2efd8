use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::PersistenceError;
use crate::model::{AggregateId, CommittedEvent, GlobalPosition, UncommittedEvent};
use crate::store::contract::{validate_batch, AllCommittedEventsPage, EventPersistence};

mod locator;

pub use locator::{FilesEventLocator, FilesStoreConfig};

// ============================================================================
// File-Backed Backend
// ============================================================================
//
// One JSON file per event, one directory per stream, one index file at the
// store root mapping global sequence numbers to event file paths. The index
// is a cache over the file tree: on startup it is validated against its own
// counter and rebuilt from the event files whenever it cannot be trusted.
//
// Every operation serializes through one async lock. Single writer, single
// reader during writes. Two processes racing on the same store are caught
// by the event-file existence check at commit time.
//
// Durability note: a commit writes its event files first and rewrites the
// index after. The index rewrite goes through a temp file and an atomic
// rename, so a torn index is never observable; a crash between the event
// files and the rename leaves the index stale, and the next startup heals
// it from the files on disk. Until the rename lands, the commit's
// atomicity is not durable.
//
// ============================================================================

/// On-disk schema of one event file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEventData {
    global_sequence_number: u64,
    aggregate_id: String,
    aggregate_sequence_number: u64,
    data: String,
    metadata: String,
}

impl FileEventData {
    fn into_committed(self) -> CommittedEvent {
        CommittedEvent {
            aggregate_id: AggregateId::new(self.aggregate_id),
            aggregate_sequence_number: self.aggregate_sequence_number,
            global_sequence_number: Some(self.global_sequence_number),
            data: self.data,
            metadata: self.metadata,
        }
    }
}

/// On-disk schema of the index file.
///
/// `deleted_entries` counts global slots freed by stream deletion, so the
/// startup consistency check `log.len() + deleted_entries ==
/// global_sequence_number` keeps holding after deletes. Sequence numbers
/// themselves are never handed out twice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct EventStoreLog {
    global_sequence_number: u64,
    #[serde(default)]
    deleted_entries: u64,
    log: BTreeMap<u64, PathBuf>,
}

impl EventStoreLog {
    fn is_consistent(&self) -> bool {
        self.log.len() as u64 + self.deleted_entries == self.global_sequence_number
            && self.log.keys().next_back().copied().unwrap_or(0) <= self.global_sequence_number
    }
}

/// Event persistence over a directory tree of JSON files.
pub struct FilesEventPersistence {
    locator: FilesEventLocator,
    inner: Mutex<EventStoreLog>,
}

impl FilesEventPersistence {
    /// Open (or create) a store at the configured path, loading the index
    /// and rebuilding it from the event files when it cannot be trusted.
    pub async fn open(config: FilesStoreConfig) -> Result<Self, PersistenceError> {
        let locator = FilesEventLocator::new(&config);
        fs::create_dir_all(locator.store_path()).await?;

        let index_path = locator.index_path();
        let inner = if fs::try_exists(&index_path).await? {
            let json = fs::read_to_string(&index_path).await?;
            match serde_json::from_str::<EventStoreLog>(&json) {
                Ok(log) if log.is_consistent() => log,
                Ok(log) => {
                    tracing::info!(
                        entry_count = log.log.len(),
                        recorded_counter = log.global_sequence_number,
                        "Event index is inconsistent, rebuilding from event files"
                    );
                    Self::rebuild_index(&locator, log.global_sequence_number).await?
                }
                Err(error) => {
                    tracing::info!(
                        error = %error,
                        "Event index is unreadable, rebuilding from event files"
                    );
                    Self::rebuild_index(&locator, 0).await?
                }
            }
        } else {
            EventStoreLog::default()
        };

        let store = Self {
            locator,
            inner: Mutex::new(inner),
        };
        // Persist the rebuilt (or fresh) view so the next startup starts clean.
        {
            let inner = store.inner.lock().await;
            if inner.global_sequence_number > 0 || fs::try_exists(&store.locator.index_path()).await? {
                store.write_index(&inner).await?;
            }
        }
        Ok(store)
    }

    /// Scan every event file on disk and rebuild the index from their own
    /// recorded global sequence numbers. `counter_floor` is the previously
    /// recorded counter, which the rebuilt counter never drops below so
    /// deleted sequence numbers stay retired.
    async fn rebuild_index(
        locator: &FilesEventLocator,
        counter_floor: u64,
    ) -> Result<EventStoreLog, PersistenceError> {
        let mut log = BTreeMap::new();

        let mut streams = fs::read_dir(locator.store_path()).await?;
        while let Some(stream_dir) = streams.next_entry().await? {
            if !stream_dir.file_type().await?.is_dir() {
                continue;
            }
            let mut events = fs::read_dir(stream_dir.path()).await?;
            while let Some(event_file) = events.next_entry().await? {
                let path = event_file.path();
                if path.extension().map(|e| e != "json").unwrap_or(true) {
                    continue;
                }
                let data = Self::read_event_file(&path).await?;
                let relative = PathBuf::from(stream_dir.file_name()).join(event_file.file_name());
                log.insert(data.global_sequence_number, relative);
            }
        }

        let max_found = log.keys().next_back().copied().unwrap_or(0);
        let global_sequence_number = max_found.max(counter_floor);
        let rebuilt = EventStoreLog {
            deleted_entries: global_sequence_number - log.len() as u64,
            global_sequence_number,
            log,
        };
        tracing::info!(
            entry_count = rebuilt.log.len(),
            global_sequence_number = rebuilt.global_sequence_number,
            "Rebuilt event index"
        );
        Ok(rebuilt)
    }

    async fn read_event_file(path: &Path) -> Result<FileEventData, PersistenceError> {
        let json = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Rewrite the whole index: temp file first, then an atomic rename
    /// over the live one.
    async fn write_index(&self, inner: &EventStoreLog) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(inner)?;
        let swap = self.locator.index_swap_path();
        fs::write(&swap, json).await?;
        fs::rename(&swap, self.locator.index_path()).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventPersistence for FilesEventPersistence {
    async fn commit_events(
        &self,
        id: &AggregateId,
        events: &[UncommittedEvent],
    ) -> Result<Vec<CommittedEvent>, PersistenceError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        validate_batch(id, events)?;

        let mut pending = Vec::with_capacity(events.len());
        for event in events {
            pending.push((event, event.metadata.to_json()?));
        }

        let mut inner = self.inner.lock().await;

        fs::create_dir_all(self.locator.stream_path(id)).await?;

        // Check every target slot before writing any file, so a losing
        // racer leaves nothing behind.
        for event in events {
            let path = self.locator.event_path(id, event.aggregate_sequence_number);
            if fs::try_exists(&path).await? {
                return Err(PersistenceError::OptimisticConcurrency {
                    aggregate_id: id.to_string(),
                    details: format!(
                        "event {} already exists for this stream",
                        event.aggregate_sequence_number
                    ),
                });
            }
        }

        let mut committed = Vec::with_capacity(events.len());
        for (event, metadata) in pending {
            inner.global_sequence_number += 1;
            let record = FileEventData {
                global_sequence_number: inner.global_sequence_number,
                aggregate_id: id.as_str().to_string(),
                aggregate_sequence_number: event.aggregate_sequence_number,
                data: event.data.clone(),
                metadata,
            };

            let path = self.locator.event_path(id, event.aggregate_sequence_number);
            tracing::trace!(path = %path.display(), "Writing event file");
            fs::write(&path, serde_json::to_string_pretty(&record)?).await?;

            let global = record.global_sequence_number;
            let relative = self
                .locator
                .relative_event_path(id, event.aggregate_sequence_number);
            inner.log.insert(global, relative);
            committed.push(record.into_committed());
        }

        self.write_index(&inner).await?;

        tracing::debug!(
            aggregate_id = %id,
            event_count = committed.len(),
            global_sequence_number = inner.global_sequence_number,
            "Committed events to file store"
        );

        Ok(committed)
    }

    async fn load_events(&self, id: &AggregateId) -> Result<Vec<CommittedEvent>, PersistenceError> {
        let _inner = self.inner.lock().await;

        let mut committed = Vec::new();
        for sequence_number in 1u64.. {
            let path = self.locator.event_path(id, sequence_number);
            if !fs::try_exists(&path).await? {
                break;
            }
            committed.push(Self::read_event_file(&path).await?.into_committed());
        }
        Ok(committed)
    }

    async fn load_all_committed_events(
        &self,
        position: &GlobalPosition,
        page_size: usize,
    ) -> Result<AllCommittedEventsPage, PersistenceError> {
        let from = position.to_sequence(1)?;
        let inner = self.inner.lock().await;

        // Deletion leaves holes in the global keyspace; walking the ordered
        // index keeps the feed moving past them.
        let entries: Vec<(u64, PathBuf)> = inner
            .log
            .range(from..)
            .take(page_size)
            .map(|(global, path)| (*global, path.clone()))
            .collect();

        let mut events = Vec::with_capacity(entries.len());
        for (_, relative) in &entries {
            let path = self.locator.resolve(relative);
            events.push(Self::read_event_file(&path).await?.into_committed());
        }

        let next = entries.last().map(|(global, _)| global + 1).unwrap_or(from);
        Ok(AllCommittedEventsPage::new(GlobalPosition::from(next), events))
    }

    async fn delete_events(&self, id: &AggregateId) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock().await;

        let stream_path = self.locator.stream_path(id);
        if !fs::try_exists(&stream_path).await? {
            tracing::debug!(aggregate_id = %id, "Stream has no files to delete");
            return Ok(());
        }
        fs::remove_dir_all(&stream_path).await?;

        let prefix = Path::new(id.as_str());
        let before = inner.log.len();
        inner.log.retain(|_, path| !path.starts_with(prefix));
        inner.deleted_entries += (before - inner.log.len()) as u64;
        self.write_index(&inner).await?;

        tracing::debug!(
            aggregate_id = %id,
            event_count = before - inner.log.len(),
            "Deleted stream from file store"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventMetadata;
    use std::sync::Arc;
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
            .map(|&n| UncommittedEvent::new(n, format!(r#"{{"n":{n}}}"#), metadata()))
            .collect()
    }

    async fn open_store(dir: &tempfile::TempDir) -> FilesEventPersistence {
        FilesEventPersistence::open(FilesStoreConfig::new(dir.path()))
            .await
            .expect("store opens")
    }

    #[tokio::test]
    async fn test_committed_events_come_back_in_stream_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir).await;
        let id = AggregateId::new("order-1");

        let committed = store.commit_events(&id, &batch(&[1, 2, 3])).await.expect("commit");
        assert_eq!(committed.len(), 3);
        assert_eq!(
            committed.iter().filter_map(|e| e.global_sequence_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let loaded = store.load_events(&id).await.expect("load");
        assert_eq!(
            loaded.iter().map(|e| e.aggregate_sequence_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_occupied_slot_fails_the_whole_commit_and_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir).await;
        let id = AggregateId::new("order-1");

        store.commit_events(&id, &batch(&[1, 2, 3])).await.expect("first commit");

        // Stale writer: expected version 1, but the stream is at 3.
        let err = store.commit_events(&id, &batch(&[2, 3])).await.expect_err("conflict");
        assert!(err.is_concurrency_violation());

        let loaded = store.load_events(&id).await.expect("load");
        assert_eq!(loaded.len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_commits_to_one_stream_have_one_winner() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(open_store(&dir).await);
        let id = AggregateId::new("order-1");

        let (a, b) = tokio::join!(
            store.commit_events(&id, &batch(&[1])),
            store.commit_events(&id, &batch(&[1])),
        );

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1, "exactly one commit wins");
        let loser = if a.is_err() { a } else { b };
        assert!(loser.expect_err("one loses").is_concurrency_violation());

        let loaded = store.load_events(&id).await.expect("load");
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn test_paging_reproduces_the_feed_exactly_once_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir).await;
        store
            .commit_events(&AggregateId::new("a"), &batch(&[1, 2, 3]))
            .await
            .expect("commit a");
        store
            .commit_events(&AggregateId::new("b"), &batch(&[1, 2]))
            .await
            .expect("commit b");

        for page_size in [1usize, 2, 3, 100] {
            let mut position = GlobalPosition::start();
            let mut seen = Vec::new();
            loop {
                let page = store
                    .load_all_committed_events(&position, page_size)
                    .await
                    .expect("page");
                if page.is_empty() {
                    break;
                }
                seen.extend(page.events.iter().filter_map(|e| e.global_sequence_number));
                position = page.next_position;
            }
            assert_eq!(seen, vec![1, 2, 3, 4, 5], "page_size {page_size}");
        }
    }

    #[tokio::test]
    async fn test_empty_feed_returns_the_same_position_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir).await;

        let page = store
            .load_all_committed_events(&GlobalPosition::start(), 10)
            .await
            .expect("page");
        assert!(page.is_empty());
        assert_eq!(page.next_position.to_sequence(1).expect("parses"), 1);
    }

    #[tokio::test]
    async fn test_deleted_stream_loads_empty_and_delete_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir).await;
        let id = AggregateId::new("order-1");

        store.commit_events(&id, &batch(&[1, 2])).await.expect("commit");
        store.delete_events(&id).await.expect("delete");

        assert!(store.load_events(&id).await.expect("load").is_empty());
        store.delete_events(&id).await.expect("second delete");
        store
            .delete_events(&AggregateId::new("never-existed"))
            .await
            .expect("deleting the unknown");
    }

    #[tokio::test]
    async fn test_feed_keeps_paging_past_a_deleted_stream() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir).await;
        store
            .commit_events(&AggregateId::new("a"), &batch(&[1, 2]))
            .await
            .expect("commit a");
        store
            .commit_events(&AggregateId::new("b"), &batch(&[1]))
            .await
            .expect("commit b");
        store.delete_events(&AggregateId::new("a")).await.expect("delete a");

        let page = store
            .load_all_committed_events(&GlobalPosition::start(), 10)
            .await
            .expect("page");
        assert_eq!(
            page.events.iter().filter_map(|e| e.global_sequence_number).collect::<Vec<_>>(),
            vec![3]
        );
    }

    #[tokio::test]
    async fn test_global_sequence_numbers_survive_deletion_and_restart() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = open_store(&dir).await;
            store
                .commit_events(&AggregateId::new("a"), &batch(&[1, 2, 3]))
                .await
                .expect("commit");
            store.delete_events(&AggregateId::new("a")).await.expect("delete");
        }

        let store = open_store(&dir).await;
        let committed = store
            .commit_events(&AggregateId::new("b"), &batch(&[1]))
            .await
            .expect("commit after restart");
        assert_eq!(committed[0].global_sequence_number, Some(4), "slots 1..3 stay retired");
    }

    #[tokio::test]
    async fn test_missing_index_is_rebuilt_from_event_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = open_store(&dir).await;
            store
                .commit_events(&AggregateId::new("a"), &batch(&[1, 2]))
                .await
                .expect("commit a");
            store
                .commit_events(&AggregateId::new("b"), &batch(&[1]))
                .await
                .expect("commit b");
        }
        std::fs::remove_file(dir.path().join("log.json")).expect("drop the index");

        let store = open_store(&dir).await;
        let page = store
            .load_all_committed_events(&GlobalPosition::start(), 10)
            .await
            .expect("page");
        assert_eq!(
            page.events.iter().filter_map(|e| e.global_sequence_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let committed = store
            .commit_events(&AggregateId::new("c"), &batch(&[1]))
            .await
            .expect("commit after rebuild");
        assert_eq!(committed[0].global_sequence_number, Some(4), "counter recovered as max");
    }

    #[tokio::test]
    async fn test_corrupt_index_is_rebuilt_from_event_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = open_store(&dir).await;
            store
                .commit_events(&AggregateId::new("a"), &batch(&[1, 2]))
                .await
                .expect("commit");
        }
        std::fs::write(dir.path().join("log.json"), "{ not json").expect("corrupt the index");

        let store = open_store(&dir).await;
        let loaded = store.load_events(&AggregateId::new("a")).await.expect("load");
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_index_counter_triggers_a_rebuild() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = open_store(&dir).await;
            store
                .commit_events(&AggregateId::new("a"), &batch(&[1, 2]))
                .await
                .expect("commit");
        }
        // Claim three events while only two entries exist.
        let json = std::fs::read_to_string(dir.path().join("log.json")).expect("read index");
        let tampered = json.replace("\"global_sequence_number\": 2", "\"global_sequence_number\": 3");
        std::fs::write(dir.path().join("log.json"), tampered).expect("tamper");

        let store = open_store(&dir).await;
        let committed = store
            .commit_events(&AggregateId::new("b"), &batch(&[1]))
            .await
            .expect("commit");
        // The recorded counter survives as a floor even though only two
        // files were found.
        assert_eq!(committed[0].global_sequence_number, Some(4));
    }

    #[tokio::test]
    async fn test_unknown_stream_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir).await;
        assert!(store
            .load_events(&AggregateId::new("ghost"))
            .await
            .expect("load")
            .is_empty());
    }
}

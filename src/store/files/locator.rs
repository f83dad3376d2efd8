use std::path::{Path, PathBuf};

use crate::model::AggregateId;

// ============================================================================
// Filesystem Layout
// ============================================================================

/// Configuration for the file-backed store.
#[derive(Debug, Clone)]
pub struct FilesStoreConfig {
    /// Root directory of the store. Created if missing.
    pub store_path: PathBuf,
}

impl FilesStoreConfig {
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
        }
    }
}

/// Maps streams and events to their on-disk locations.
///
/// Layout: one subdirectory per aggregate id, one JSON file per event named
/// by its aggregate sequence number, and a single index file at the store
/// root. Aggregate ids are used verbatim as directory names; id hygiene is
/// the producing aggregate type's job.
#[derive(Debug, Clone)]
pub struct FilesEventLocator {
    store_path: PathBuf,
}

impl FilesEventLocator {
    const INDEX_FILE: &'static str = "log.json";

    pub fn new(config: &FilesStoreConfig) -> Self {
        Self {
            store_path: config.store_path.clone(),
        }
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Directory holding one stream's event files.
    pub fn stream_path(&self, id: &AggregateId) -> PathBuf {
        self.store_path.join(id.as_str())
    }

    /// Path of one event file, as stored in the index: relative to the
    /// store root so the store stays relocatable.
    pub fn relative_event_path(&self, id: &AggregateId, aggregate_sequence_number: u64) -> PathBuf {
        PathBuf::from(id.as_str()).join(format!("{aggregate_sequence_number}.json"))
    }

    pub fn event_path(&self, id: &AggregateId, aggregate_sequence_number: u64) -> PathBuf {
        self.store_path
            .join(self.relative_event_path(id, aggregate_sequence_number))
    }

    /// Resolve an index entry back to an absolute path.
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.store_path.join(relative)
    }

    pub fn index_path(&self) -> PathBuf {
        self.store_path.join(Self::INDEX_FILE)
    }

    pub fn index_swap_path(&self) -> PathBuf {
        self.store_path.join(format!("{}.tmp", Self::INDEX_FILE))
    }
}

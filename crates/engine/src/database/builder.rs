//! Database builder
//!
//! Every collaborator has a reference implementation the builder falls back
//! to:
//!
//! | collaborator | default |
//! |--------------|---------|
//! | page cache | `MemoryPageCache` |
//! | metadata | `FileMetadataStore` under `path`, else `InMemoryMetadata` |
//! | block manager | `TrackingBlockManager` |

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use pagestore_concurrency::{BackupTracker, CheckpointLocks, TransactionManager};
use pagestore_core::Result;
use pagestore_durability::{
    BlockManager, CacheFlush, FileMetadataStore, InMemoryMetadata, MemoryPageCache,
    MetadataStore, TrackingBlockManager, METADATA_URI,
};
use tracing::info;

use super::Database;
use crate::coordinator::CheckpointCoordinator;
use crate::registry::TableRegistry;
use crate::tree::TreeCheckpointer;

/// Name of the metadata file inside a database directory
pub const METADATA_FILE_NAME: &str = "pagestore.meta";

/// Builder for [`Database`]
#[derive(Default)]
pub struct DatabaseBuilder {
    path: Option<PathBuf>,
    cache: Option<Arc<dyn CacheFlush>>,
    metadata: Option<Arc<dyn MetadataStore>>,
    block_manager: Option<Arc<dyn BlockManager>>,
}

impl DatabaseBuilder {
    /// Create a builder using every default
    pub fn new() -> Self {
        DatabaseBuilder::default()
    }

    /// Keep metadata in a file under this directory
    ///
    /// Ignored when a metadata store is supplied explicitly.
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Use this page cache
    pub fn cache(mut self, cache: Arc<dyn CacheFlush>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Use this metadata store
    pub fn metadata(mut self, metadata: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Use this block manager
    pub fn block_manager(mut self, block_manager: Arc<dyn BlockManager>) -> Self {
        self.block_manager = Some(block_manager);
        self
    }

    /// Open the database
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or its metadata
    /// file cannot be loaded.
    pub fn open(self) -> Result<Arc<Database>> {
        let metadata: Arc<dyn MetadataStore> = match (self.metadata, &self.path) {
            (Some(metadata), _) => metadata,
            (None, Some(path)) => {
                std::fs::create_dir_all(path)?;
                Arc::new(FileMetadataStore::open(path.join(METADATA_FILE_NAME))?)
            }
            (None, None) => Arc::new(InMemoryMetadata::new()),
        };
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryPageCache::new()));
        let block_manager = self
            .block_manager
            .unwrap_or_else(|| Arc::new(TrackingBlockManager::new()));

        let registry = Arc::new(TableRegistry::new());
        let locks = CheckpointLocks::new();
        let backups = BackupTracker::new();
        let txn_manager = Arc::new(TransactionManager::new());

        let executor = TreeCheckpointer::new(
            cache,
            Arc::clone(&metadata),
            Arc::clone(&block_manager),
            Arc::clone(&locks),
            Arc::clone(&backups),
            &registry,
        );
        let coordinator = CheckpointCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&metadata),
            block_manager,
            Arc::clone(&txn_manager),
            executor,
        );

        registry.open(METADATA_URI);
        info!(
            target: "pagestore::db",
            path = ?self.path,
            tables = metadata.tables()?.len(),
            "Database opened"
        );

        Ok(Arc::new(Database {
            registry,
            metadata,
            locks,
            backups,
            txn_manager,
            coordinator,
            schema_lock: Mutex::new(()),
            next_session_id: AtomicU64::new(1),
        }))
    }
}

impl std::fmt::Debug for DatabaseBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseBuilder")
            .field("path", &self.path)
            .field("cache", &self.cache.is_some())
            .field("metadata", &self.metadata.is_some())
            .field("block_manager", &self.block_manager.is_some())
            .finish()
    }
}

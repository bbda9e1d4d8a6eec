//! Pagestore - named, transactionally-consistent checkpoints for a page store
//!
//! A checkpoint captures every target table as of one snapshot and records
//! it in the table's checkpoint list. Applications name checkpoints, drop
//! them individually or by range, and read them through cursors that pin
//! them against deletion. Unnamed checkpoints use the internal name
//! `PagestoreCheckpoint`, one generation per checkpoint.
//!
//! # Quick Start
//!
//! ```ignore
//! use pagestore::{CheckpointConfig, Database};
//!
//! let db = Database::in_memory()?;
//! db.create_table("table:orders")?;
//! db.write("table:orders")?;
//!
//! let mut session = db.open_session();
//! db.checkpoint(&mut session, &CheckpointConfig::new().with_name("daily"))?;
//!
//! let cursor = db.open_checkpoint("table:orders", "daily")?;
//! ```
//!
//! # Architecture
//!
//! - `pagestore-core`: checkpoint lists, the list editor, naming rules, request configuration
//! - `pagestore-concurrency`: transactions, checkpoint locks, backup sessions
//! - `pagestore-durability`: page cache, metadata store, block manager, metadata journal
//! - `pagestore-engine`: single-table executor, database-wide coordinator, `Database`

pub use pagestore_concurrency::{
    BackupSession, CheckpointLocks, CheckpointPin, IsolationLevel, TransactionContext,
    TransactionManager,
};
pub use pagestore_core::{
    drop_named, drop_range_from, drop_range_to, is_reserved, validate_name, Checkpoint,
    CheckpointConfig, CheckpointList, DropSpec, Error, Result, TargetEntry, DROP_ALL,
    RESERVED_CHECKPOINT_NAME,
};
pub use pagestore_durability::{
    BlockManager, CacheFlush, FileMetadataStore, InMemoryMetadata, JournalResult,
    MemoryPageCache, MetaJournal, MetadataStore, SyncMode, TrackingBlockManager, METADATA_URI,
};
pub use pagestore_engine::{
    CheckpointCoordinator, CheckpointCursor, CheckpointKind, CheckpointSummary,
    CheckpointTargets, Database, DatabaseBuilder, Session, TableCheckpoint, TableHandle,
    TableRegistry, TreeCheckpointer, TreeOutcome,
};

//! Durability collaborators for pagestore checkpointing
//!
//! This crate holds everything a checkpoint hands off to storage:
//!
//! - cache: the page cache flush contract and an in-memory cache
//! - metadata: persisted checkpoint lists, in memory or in a file
//! - block: reclamation of blocks freed by deleted checkpoints
//! - journal: deferred reclamation for multi-table checkpoints

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block;
pub mod cache;
pub mod journal;
pub mod metadata;
pub mod metadata_file;

pub use block::{BlockManager, FreedCheckpoint, TrackingBlockManager};
pub use cache::{CacheFlush, FlushRecord, MemoryPageCache, SyncMode, PAGE_SIZE};
pub use journal::{JournalResult, MetaJournal};
pub use metadata::{InMemoryMetadata, MetadataStore, MetadataWrite, METADATA_URI};
pub use metadata_file::FileMetadataStore;

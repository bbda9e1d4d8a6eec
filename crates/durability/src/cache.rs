//! Cache flush contract
//!
//! The page cache owns every dirty page of a table. A checkpoint asks it to
//! write those pages out and to record where the new checkpoint's root
//! landed in the checkpoint list it passes in.
//!
//! [`MemoryPageCache`] is the reference implementation: it counts dirty
//! pages per table, hands out block addresses from a bump allocator and
//! records every flush so callers can inspect what was written and under
//! which isolation level.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;

use pagestore_concurrency::{IsolationLevel, TransactionContext};
use pagestore_core::{BlockAddress, CheckpointList, Error, Result};
use tracing::{debug, trace};

/// Bytes per page in the reference cache
pub const PAGE_SIZE: u64 = 4096;

/// How a flush treats the table's in-memory pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// Write dirty pages durably and keep the cache
    Sync,
    /// Write dirty pages durably, then evict the table from the cache
    SyncDiscard,
    /// Evict the table from the cache without writing anything
    DiscardNoWrite,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncMode::Sync => "sync",
            SyncMode::SyncDiscard => "sync-discard",
            SyncMode::DiscardNoWrite => "discard",
        };
        f.write_str(s)
    }
}

/// Page cache operations used by checkpoints
pub trait CacheFlush: Send + Sync {
    /// Mark the table's root page dirty so the next flush writes something
    fn force_write(&self, cache_id: &str) -> Result<()>;

    /// Flush the table
    ///
    /// When `checkpoints` is given, the record flagged `add` receives the
    /// address of the newly written root.
    fn flush(
        &self,
        cache_id: &str,
        checkpoints: Option<&mut CheckpointList>,
        mode: SyncMode,
        txn: &TransactionContext,
    ) -> Result<()>;
}

/// One call to [`CacheFlush::flush`] as observed by [`MemoryPageCache`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushRecord {
    /// Cache identifier of the flushed table
    pub cache_id: String,
    /// Requested mode
    pub mode: SyncMode,
    /// Isolation of the flushing transaction
    pub isolation: IsolationLevel,
    /// Pages written (zero for discards)
    pub pages_written: u64,
}

#[derive(Debug, Default)]
struct CachedTable {
    dirty_pages: u64,
    root_dirty: bool,
}

#[derive(Debug, Default)]
struct CacheState {
    tables: HashMap<String, CachedTable>,
    next_offset: u64,
    history: Vec<FlushRecord>,
    fail_next: Option<String>,
}

/// In-memory page cache
#[derive(Debug, Default)]
pub struct MemoryPageCache {
    state: Mutex<CacheState>,
}

impl MemoryPageCache {
    /// Create an empty cache
    pub fn new() -> Self {
        MemoryPageCache::default()
    }

    /// Dirty `pages` pages of a table
    pub fn write(&self, cache_id: &str, pages: u64) {
        let mut state = self.state.lock();
        state.tables.entry(cache_id.to_string()).or_default().dirty_pages += pages;
    }

    /// Dirty page count of a table, including a forced root
    pub fn dirty_pages(&self, cache_id: &str) -> u64 {
        self.state
            .lock()
            .tables
            .get(cache_id)
            .map_or(0, |t| t.dirty_pages + u64::from(t.root_dirty))
    }

    /// True if the table has pages in the cache
    pub fn is_cached(&self, cache_id: &str) -> bool {
        self.state.lock().tables.contains_key(cache_id)
    }

    /// Every flush so far, oldest first
    pub fn flushes(&self) -> Vec<FlushRecord> {
        self.state.lock().history.clone()
    }

    /// Flushes of one table
    pub fn flushes_of(&self, cache_id: &str) -> Vec<FlushRecord> {
        self.state
            .lock()
            .history
            .iter()
            .filter(|r| r.cache_id == cache_id)
            .cloned()
            .collect()
    }

    /// Number of flushes that wrote pages
    pub fn write_count(&self) -> usize {
        self.state
            .lock()
            .history
            .iter()
            .filter(|r| r.mode != SyncMode::DiscardNoWrite)
            .count()
    }

    /// Make the next writing flush of `cache_id` fail
    pub fn fail_next_flush(&self, cache_id: &str) {
        self.state.lock().fail_next = Some(cache_id.to_string());
    }
}

impl CacheFlush for MemoryPageCache {
    fn force_write(&self, cache_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.tables.entry(cache_id.to_string()).or_default().root_dirty = true;
        trace!(target: "pagestore::cache", cache_id, "Root page marked dirty");
        Ok(())
    }

    fn flush(
        &self,
        cache_id: &str,
        checkpoints: Option<&mut CheckpointList>,
        mode: SyncMode,
        txn: &TransactionContext,
    ) -> Result<()> {
        let mut state = self.state.lock();

        if mode == SyncMode::DiscardNoWrite {
            state.tables.remove(cache_id);
            state.history.push(FlushRecord {
                cache_id: cache_id.to_string(),
                mode,
                isolation: txn.isolation(),
                pages_written: 0,
            });
            debug!(target: "pagestore::cache", cache_id, "Cache discarded");
            return Ok(());
        }

        if state.fail_next.as_deref() == Some(cache_id) {
            state.fail_next = None;
            return Err(Error::storage(format!("{}: write failed", cache_id)));
        }

        let pages = state
            .tables
            .get(cache_id)
            .map_or(0, |t| t.dirty_pages + u64::from(t.root_dirty));
        let size = pages * PAGE_SIZE;
        let address = BlockAddress {
            offset: state.next_offset,
            size,
        };
        state.next_offset += size;

        if let Some(ckpt) = checkpoints.and_then(|list| list.added_mut()) {
            ckpt.address = Some(address);
            ckpt.size = size;
        }

        match mode {
            SyncMode::SyncDiscard => {
                state.tables.remove(cache_id);
            }
            _ => {
                if let Some(table) = state.tables.get_mut(cache_id) {
                    table.dirty_pages = 0;
                    table.root_dirty = false;
                }
            }
        }

        state.history.push(FlushRecord {
            cache_id: cache_id.to_string(),
            mode,
            isolation: txn.isolation(),
            pages_written: pages,
        });
        debug!(target: "pagestore::cache", cache_id, %mode, pages, "Cache flushed");
        Ok(())
    }
}

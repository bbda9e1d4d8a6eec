//! Block manager contract
//!
//! Once a checkpoint is removed from a table's persisted list, the blocks
//! only it referenced can be reused. Resolving hands the removed records to
//! the block manager, which frees their extents.

use parking_lot::Mutex;

use pagestore_core::{BlockAddress, Checkpoint, Error, Result};
use tracing::debug;

/// Storage block reclamation
pub trait BlockManager: Send + Sync {
    /// Free the blocks of checkpoints removed from `uri`'s list
    fn resolve(&self, uri: &str, reclaimed: &[Checkpoint]) -> Result<()>;
}

/// Extent freed by [`TrackingBlockManager`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreedCheckpoint {
    /// Owning table
    pub uri: String,
    /// Checkpoint name
    pub name: String,
    /// Freed extent, if the checkpoint was ever written
    pub address: Option<BlockAddress>,
}

/// Block manager that records what it frees
#[derive(Debug, Default)]
pub struct TrackingBlockManager {
    freed: Mutex<Vec<FreedCheckpoint>>,
    fail_next: Mutex<bool>,
}

impl TrackingBlockManager {
    /// Create a block manager that has freed nothing
    pub fn new() -> Self {
        TrackingBlockManager::default()
    }

    /// Everything freed so far, in resolution order
    pub fn freed(&self) -> Vec<FreedCheckpoint> {
        self.freed.lock().clone()
    }

    /// Names freed for one table
    pub fn freed_names(&self, uri: &str) -> Vec<String> {
        self.freed
            .lock()
            .iter()
            .filter(|f| f.uri == uri)
            .map(|f| f.name.clone())
            .collect()
    }

    /// Bytes returned to the free list
    pub fn freed_bytes(&self) -> u64 {
        self.freed
            .lock()
            .iter()
            .filter_map(|f| f.address)
            .map(|a| a.size)
            .sum()
    }

    /// Make the next non-empty resolve fail
    pub fn fail_next_resolve(&self) {
        *self.fail_next.lock() = true;
    }
}

impl BlockManager for TrackingBlockManager {
    fn resolve(&self, uri: &str, reclaimed: &[Checkpoint]) -> Result<()> {
        if reclaimed.is_empty() {
            return Ok(());
        }
        {
            let mut fail = self.fail_next.lock();
            if *fail {
                *fail = false;
                return Err(Error::storage(format!("{}: block reclamation failed", uri)));
            }
        }

        let mut freed = self.freed.lock();
        for ckpt in reclaimed {
            freed.push(FreedCheckpoint {
                uri: uri.to_string(),
                name: ckpt.name.clone(),
                address: ckpt.address,
            });
        }
        debug!(target: "pagestore::block", uri, count = reclaimed.len(), "Checkpoint blocks freed");
        Ok(())
    }
}

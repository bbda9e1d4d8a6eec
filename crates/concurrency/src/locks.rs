//! Per-checkpoint-name locks
//!
//! Readers (checkpoint cursors) pin a named checkpoint of a table with a
//! shared lock; a checkpoint operation that wants to delete that checkpoint
//! needs the exclusive lock. Acquisition never blocks: a conflicting holder
//! yields `Error::Busy` immediately and the caller decides whether to fail or
//! keep the checkpoint.
//!
//! Locks are keyed by `(table, checkpoint name)`. Entries are removed from
//! the table once nobody holds them.

use dashmap::DashMap;
use std::sync::Arc;

use pagestore_core::{Error, Result};
use tracing::trace;

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    exclusive: bool,
}

impl LockState {
    fn is_free(&self) -> bool {
        self.readers == 0 && !self.exclusive
    }
}

type LockKey = (String, String);

/// Lock table for named checkpoints
#[derive(Debug, Default)]
pub struct CheckpointLocks {
    locks: DashMap<LockKey, LockState>,
}

impl CheckpointLocks {
    /// Create an empty lock table
    pub fn new() -> Arc<Self> {
        Arc::new(CheckpointLocks::default())
    }

    /// Try to take the exclusive lock on a table's checkpoint
    ///
    /// # Errors
    ///
    /// Returns `Error::Busy` if the checkpoint is pinned or already locked.
    pub fn try_lock_exclusive(
        self: &Arc<Self>,
        table: &str,
        name: &str,
    ) -> Result<CheckpointLockGuard> {
        let key = (table.to_string(), name.to_string());
        {
            let mut state = self.locks.entry(key.clone()).or_default();
            if !state.is_free() {
                return Err(Error::busy(format!(
                    "checkpoint \"{}\" of {} is in use",
                    name, table
                )));
            }
            state.exclusive = true;
        }
        trace!(target: "pagestore::ckpt", table, name, "Checkpoint locked");
        Ok(CheckpointLockGuard {
            locks: Arc::clone(self),
            key,
        })
    }

    /// Pin a table's checkpoint for reading
    ///
    /// # Errors
    ///
    /// Returns `Error::Busy` if the checkpoint is exclusively locked.
    pub fn pin(self: &Arc<Self>, table: &str, name: &str) -> Result<CheckpointPin> {
        let key = (table.to_string(), name.to_string());
        {
            let mut state = self.locks.entry(key.clone()).or_default();
            if state.exclusive {
                return Err(Error::busy(format!(
                    "checkpoint \"{}\" of {} is being dropped",
                    name, table
                )));
            }
            state.readers += 1;
        }
        Ok(CheckpointPin {
            locks: Arc::clone(self),
            key,
        })
    }

    /// True if a reader pins the checkpoint
    pub fn is_pinned(&self, table: &str, name: &str) -> bool {
        self.locks
            .get(&(table.to_string(), name.to_string()))
            .map_or(false, |s| s.readers > 0)
    }

    /// True if the checkpoint is exclusively locked
    pub fn is_locked(&self, table: &str, name: &str) -> bool {
        self.locks
            .get(&(table.to_string(), name.to_string()))
            .map_or(false, |s| s.exclusive)
    }

    /// Number of checkpoints with any holder
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// True if nothing is locked or pinned
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn release(&self, key: &LockKey, f: impl FnOnce(&mut LockState)) {
        if let Some(mut state) = self.locks.get_mut(key) {
            f(&mut state);
        }
        self.locks.remove_if(key, |_, state| state.is_free());
    }
}

/// Exclusive lock on a named checkpoint, released on drop
#[derive(Debug)]
pub struct CheckpointLockGuard {
    locks: Arc<CheckpointLocks>,
    key: LockKey,
}

impl CheckpointLockGuard {
    /// Table the checkpoint belongs to
    pub fn table(&self) -> &str {
        &self.key.0
    }

    /// Locked checkpoint name
    pub fn name(&self) -> &str {
        &self.key.1
    }
}

impl Drop for CheckpointLockGuard {
    fn drop(&mut self) {
        self.locks.release(&self.key, |state| state.exclusive = false);
        trace!(target: "pagestore::ckpt", table = %self.key.0, name = %self.key.1, "Checkpoint unlocked");
    }
}

/// Shared pin on a named checkpoint, released on drop
#[derive(Debug)]
pub struct CheckpointPin {
    locks: Arc<CheckpointLocks>,
    key: LockKey,
}

impl CheckpointPin {
    /// Table the checkpoint belongs to
    pub fn table(&self) -> &str {
        &self.key.0
    }

    /// Pinned checkpoint name
    pub fn name(&self) -> &str {
        &self.key.1
    }
}

impl Drop for CheckpointPin {
    fn drop(&mut self) {
        self.locks
            .release(&self.key, |state| state.readers = state.readers.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_then_release() {
        let locks = CheckpointLocks::new();
        let guard = locks.try_lock_exclusive("table:a", "daily").unwrap();
        assert!(locks.is_locked("table:a", "daily"));
        assert!(locks.try_lock_exclusive("table:a", "daily").unwrap_err().is_busy());
        drop(guard);
        assert!(!locks.is_locked("table:a", "daily"));
        assert!(locks.is_empty());
    }

    #[test]
    fn test_pin_blocks_exclusive() {
        let locks = CheckpointLocks::new();
        let pin = locks.pin("table:a", "daily").unwrap();
        assert!(locks.is_pinned("table:a", "daily"));
        let err = locks.try_lock_exclusive("table:a", "daily").unwrap_err();
        assert!(err.is_busy());
        drop(pin);
        assert!(locks.try_lock_exclusive("table:a", "daily").is_ok());
    }

    #[test]
    fn test_exclusive_blocks_pin() {
        let locks = CheckpointLocks::new();
        let _guard = locks.try_lock_exclusive("table:a", "daily").unwrap();
        assert!(locks.pin("table:a", "daily").unwrap_err().is_busy());
    }

    #[test]
    fn test_multiple_pins() {
        let locks = CheckpointLocks::new();
        let p1 = locks.pin("table:a", "daily").unwrap();
        let p2 = locks.pin("table:a", "daily").unwrap();
        drop(p1);
        assert!(locks.is_pinned("table:a", "daily"));
        drop(p2);
        assert!(!locks.is_pinned("table:a", "daily"));
        assert!(locks.is_empty());
    }

    #[test]
    fn test_keys_are_per_table() {
        let locks = CheckpointLocks::new();
        let _pin = locks.pin("table:a", "daily").unwrap();
        assert!(locks.try_lock_exclusive("table:b", "daily").is_ok());
    }

    #[test]
    fn test_failed_lock_leaves_no_entry() {
        let locks = CheckpointLocks::new();
        let pin = locks.pin("table:a", "daily").unwrap();
        let _ = locks.try_lock_exclusive("table:a", "daily");
        drop(pin);
        assert!(locks.is_empty());
    }
}

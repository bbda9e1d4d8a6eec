//! Transaction manager
//!
//! Allocates transaction ids and tracks the set of running transactions so
//! that snapshot transactions can capture a consistent visibility window.
//!
//! Checkpoints begin their snapshot through [`TransactionManager::begin_snapshot`],
//! which returns a guard that releases the transaction however the
//! checkpoint exits.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use pagestore_core::{Error, Result};
use tracing::debug;

use crate::transaction::{IsolationLevel, Snapshot, TransactionContext};

/// Manages transaction id allocation and the running set
pub struct TransactionManager {
    /// Next transaction id; 0 is reserved for "no transaction"
    next_txn_id: AtomicU64,
    /// Ids of running transactions
    active: Mutex<BTreeSet<u64>>,
}

impl TransactionManager {
    /// Create a new manager
    pub fn new() -> Self {
        TransactionManager {
            next_txn_id: AtomicU64::new(1),
            active: Mutex::new(BTreeSet::new()),
        }
    }

    /// Begin a transaction in `txn`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if `txn` already has a running transaction.
    pub fn begin(&self, txn: &mut TransactionContext, isolation: IsolationLevel) -> Result<()> {
        if txn.is_running() {
            return Err(Error::invalid_input("transaction already running"));
        }

        let mut active = self.active.lock();
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let snapshot = (isolation == IsolationLevel::Snapshot).then(|| {
            let concurrent: Vec<u64> = active.iter().copied().collect();
            Snapshot {
                snap_min: concurrent.first().copied().unwrap_or(id),
                snap_max: id,
                concurrent,
            }
        });
        active.insert(id);
        drop(active);

        txn.start(id, isolation, snapshot);
        debug!(target: "pagestore::txn", txn_id = id, %isolation, "Transaction started");
        Ok(())
    }

    /// Begin a snapshot transaction released when the guard drops
    pub fn begin_snapshot<'a>(
        &'a self,
        txn: &'a mut TransactionContext,
    ) -> Result<SnapshotTransaction<'a>> {
        self.begin(txn, IsolationLevel::Snapshot)?;
        Ok(SnapshotTransaction { manager: self, txn })
    }

    /// Release the transaction running in `txn`
    pub fn release(&self, txn: &mut TransactionContext) {
        if !txn.is_running() {
            return;
        }
        let id = txn.id();
        self.active.lock().remove(&id);
        txn.finish();
        debug!(target: "pagestore::txn", txn_id = id, "Transaction released");
    }

    /// Oldest running transaction id, if any
    pub fn oldest_active(&self) -> Option<u64> {
        self.active.lock().iter().next().copied()
    }

    /// Number of running transactions
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_txn_id", &self.next_txn_id.load(Ordering::Relaxed))
            .field("active_count", &self.active_count())
            .finish()
    }
}

/// Running snapshot transaction, released on drop
#[derive(Debug)]
pub struct SnapshotTransaction<'a> {
    manager: &'a TransactionManager,
    txn: &'a mut TransactionContext,
}

impl Deref for SnapshotTransaction<'_> {
    type Target = TransactionContext;

    fn deref(&self) -> &TransactionContext {
        self.txn
    }
}

impl DerefMut for SnapshotTransaction<'_> {
    fn deref_mut(&mut self) -> &mut TransactionContext {
        self.txn
    }
}

impl Drop for SnapshotTransaction<'_> {
    fn drop(&mut self) {
        self.manager.release(self.txn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_assigns_increasing_ids() {
        let manager = TransactionManager::new();
        let mut a = TransactionContext::default();
        let mut b = TransactionContext::default();
        manager.begin(&mut a, IsolationLevel::ReadCommitted).unwrap();
        manager.begin(&mut b, IsolationLevel::ReadCommitted).unwrap();
        assert!(b.id() > a.id());
        assert_eq!(manager.active_count(), 2);
        assert_eq!(manager.oldest_active(), Some(a.id()));
    }

    #[test]
    fn test_begin_twice_fails() {
        let manager = TransactionManager::new();
        let mut txn = TransactionContext::default();
        manager.begin(&mut txn, IsolationLevel::Snapshot).unwrap();
        let err = manager.begin(&mut txn, IsolationLevel::Snapshot).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_snapshot_excludes_running() {
        let manager = TransactionManager::new();
        let mut writer = TransactionContext::default();
        manager.begin(&mut writer, IsolationLevel::ReadCommitted).unwrap();

        let mut reader = TransactionContext::default();
        manager.begin(&mut reader, IsolationLevel::Snapshot).unwrap();
        let snapshot = reader.snapshot().unwrap();
        assert!(!snapshot.is_visible(writer.id()));
        assert_eq!(snapshot.snap_max, reader.id());
    }

    #[test]
    fn test_snapshot_guard_releases() {
        let manager = TransactionManager::new();
        let mut txn = TransactionContext::new(IsolationLevel::ReadCommitted);
        {
            let guard = manager.begin_snapshot(&mut txn).unwrap();
            assert!(guard.is_running());
            assert_eq!(guard.isolation(), IsolationLevel::Snapshot);
            assert_eq!(manager.active_count(), 1);
        }
        assert!(!txn.is_running());
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_release_idle_is_noop() {
        let manager = TransactionManager::new();
        let mut txn = TransactionContext::default();
        manager.release(&mut txn);
        assert_eq!(manager.active_count(), 0);
    }
}

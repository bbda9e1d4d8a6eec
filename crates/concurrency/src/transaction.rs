//! Transaction context and isolation levels
//!
//! Checkpointing needs only a narrow slice of the transaction model: a
//! session's context records whether an application transaction is running,
//! which isolation level reads use, and (for snapshot transactions) which
//! transaction ids are visible.
//!
//! Isolation is switched temporarily in several places during a checkpoint
//! (metadata updates, handle close, the metadata table itself). Those
//! switches go through [`IsolationScope`], which restores the previous level
//! when dropped, including on early return and unwinding.

use std::ops::{Deref, DerefMut};

/// Isolation level for reads performed by a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    /// Observe the latest state, committed or not
    ReadUncommitted,
    /// Observe committed state as of each read
    #[default]
    ReadCommitted,
    /// Observe committed state as of transaction start
    Snapshot,
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IsolationLevel::ReadUncommitted => "read-uncommitted",
            IsolationLevel::ReadCommitted => "read-committed",
            IsolationLevel::Snapshot => "snapshot",
        };
        f.write_str(s)
    }
}

/// Frozen visibility window of a snapshot transaction
///
/// A transaction id is visible if it is below `snap_min`, or below
/// `snap_max` and not in the set of transactions that were running when the
/// snapshot was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Oldest transaction id running at snapshot time
    pub snap_min: u64,
    /// First transaction id allocated after the snapshot
    pub snap_max: u64,
    /// Transactions running at snapshot time (sorted)
    pub concurrent: Vec<u64>,
}

impl Snapshot {
    /// Check whether changes made by `txn_id` are visible
    pub fn is_visible(&self, txn_id: u64) -> bool {
        if txn_id < self.snap_min {
            return true;
        }
        if txn_id >= self.snap_max {
            return false;
        }
        self.concurrent.binary_search(&txn_id).is_err()
    }
}

/// Per-session transaction state
#[derive(Debug, Clone, Default)]
pub struct TransactionContext {
    id: u64,
    isolation: IsolationLevel,
    running: bool,
    snapshot: Option<Snapshot>,
}

impl TransactionContext {
    /// Create an idle context with the given default isolation
    pub fn new(isolation: IsolationLevel) -> Self {
        TransactionContext {
            isolation,
            ..Default::default()
        }
    }

    /// Transaction id (0 when idle)
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current isolation level
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Change the isolation level
    pub fn set_isolation(&mut self, isolation: IsolationLevel) {
        self.isolation = isolation;
    }

    /// True if a transaction is running in this context
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Snapshot captured at begin, for snapshot transactions
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// Check whether a change by `writer` is visible to this context
    pub fn can_see(&self, writer: u64, committed: bool) -> bool {
        if writer == self.id && self.running {
            return true;
        }
        match self.isolation {
            IsolationLevel::ReadUncommitted => true,
            IsolationLevel::ReadCommitted => committed,
            IsolationLevel::Snapshot => {
                committed && self.snapshot.as_ref().map_or(true, |s| s.is_visible(writer))
            }
        }
    }

    /// Temporarily switch isolation; the previous level returns on drop
    pub fn scoped_isolation(&mut self, isolation: IsolationLevel) -> IsolationScope<'_> {
        let saved = self.isolation;
        self.isolation = isolation;
        IsolationScope { txn: self, saved }
    }

    /// Save the current isolation level without changing it
    ///
    /// Code holding the scope may change the level freely; the saved level is
    /// restored on drop.
    pub fn preserve_isolation(&mut self) -> IsolationScope<'_> {
        let saved = self.isolation;
        IsolationScope { txn: self, saved }
    }

    pub(crate) fn start(&mut self, id: u64, isolation: IsolationLevel, snapshot: Option<Snapshot>) {
        self.id = id;
        self.isolation = isolation;
        self.running = true;
        self.snapshot = snapshot;
    }

    pub(crate) fn finish(&mut self) {
        self.id = 0;
        self.running = false;
        self.snapshot = None;
    }
}

/// Isolation override that restores the saved level when dropped
#[derive(Debug)]
pub struct IsolationScope<'a> {
    txn: &'a mut TransactionContext,
    saved: IsolationLevel,
}

impl IsolationScope<'_> {
    /// Level that will be restored
    pub fn saved(&self) -> IsolationLevel {
        self.saved
    }
}

impl Deref for IsolationScope<'_> {
    type Target = TransactionContext;

    fn deref(&self) -> &TransactionContext {
        self.txn
    }
}

impl DerefMut for IsolationScope<'_> {
    fn deref_mut(&mut self) -> &mut TransactionContext {
        self.txn
    }
}

impl Drop for IsolationScope<'_> {
    fn drop(&mut self) {
        self.txn.isolation = self.saved;
    }
}

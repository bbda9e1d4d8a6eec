//! Deferred metadata journal
//!
//! A database-wide checkpoint touches many tables, each persisted
//! independently. Blocks freed by one table's checkpoint must stay allocated
//! until the whole operation is known to have succeeded, otherwise a late
//! failure could leave an earlier table's old checkpoint pointing at reused
//! storage.
//!
//! The journal collects those deferred reclamations, plus the exclusive
//! checkpoint locks taken while planning deletions, and settles them once:
//!
//! - `end(false)` commits: every deferred reclamation is resolved through the
//!   block manager, in registration order.
//! - `end(true)` unrolls: nothing is reclaimed.
//!
//! Locks are released either way. Unrolling does not undo checkpoint lists
//! already persisted for other tables; a failed multi-table checkpoint may be
//! partially applied.
//!
//! The journal has a single writer. Checkpointing tables in parallel would
//! need it behind a mutex.

use std::fmt;
use std::sync::Arc;

use pagestore_concurrency::CheckpointLockGuard;
use pagestore_core::{Checkpoint, Result};
use tracing::{debug, warn};

use crate::block::BlockManager;

#[derive(Debug)]
struct PendingReclaim {
    uri: String,
    checkpoints: Vec<Checkpoint>,
}

/// How a journal was settled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalResult {
    /// True if deferred reclamations were applied
    pub committed: bool,
    /// Checkpoints whose blocks were freed at commit
    pub reclaimed: usize,
    /// Checkpoints whose reclamation was abandoned by unroll
    pub abandoned: usize,
    /// Checkpoint locks released
    pub locks_released: usize,
}

/// Deferred metadata journal for one checkpoint operation
pub struct MetaJournal {
    block_manager: Arc<dyn BlockManager>,
    pending: Vec<PendingReclaim>,
    locks: Vec<CheckpointLockGuard>,
    immediate: usize,
    ended: bool,
}

impl MetaJournal {
    /// Start tracking
    pub fn begin(block_manager: Arc<dyn BlockManager>) -> Self {
        debug!(target: "pagestore::ckpt", "Metadata tracking started");
        MetaJournal {
            block_manager,
            pending: Vec::new(),
            locks: Vec::new(),
            immediate: 0,
            ended: false,
        }
    }

    /// Defer reclamation of `reclaimed` until commit
    pub fn track_checkpoint(&mut self, uri: &str, reclaimed: Vec<Checkpoint>) {
        if reclaimed.is_empty() {
            return;
        }
        debug!(target: "pagestore::ckpt", uri, count = reclaimed.len(), "Reclamation deferred");
        self.pending.push(PendingReclaim {
            uri: uri.to_string(),
            checkpoints: reclaimed,
        });
    }

    /// Reclaim now, bypassing the journal
    ///
    /// Used when the table's handle will be gone before the journal settles.
    pub fn reclaim_now(&mut self, uri: &str, reclaimed: &[Checkpoint]) -> Result<()> {
        self.block_manager.resolve(uri, reclaimed)?;
        self.immediate += reclaimed.len();
        Ok(())
    }

    /// Hold a checkpoint lock until the journal ends
    pub fn track_lock(&mut self, guard: CheckpointLockGuard) {
        self.locks.push(guard);
    }

    /// True if this journal already holds the lock on `(uri, name)`
    pub fn holds_lock(&self, uri: &str, name: &str) -> bool {
        self.locks
            .iter()
            .any(|g| g.table() == uri && g.name() == name)
    }

    /// Number of checkpoints awaiting reclamation
    pub fn pending(&self) -> usize {
        self.pending.iter().map(|p| p.checkpoints.len()).sum()
    }

    /// Number of checkpoints reclaimed immediately
    pub fn reclaimed_immediately(&self) -> usize {
        self.immediate
    }

    /// Number of checkpoint locks held
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Stop tracking, committing or unrolling
    ///
    /// Ending an already-ended journal settles nothing and reports an unroll.
    ///
    /// # Errors
    ///
    /// Returns the block manager's error, tagged with the table, if a
    /// reclamation fails during commit. The failing reclamation and those
    /// after it are abandoned and logged.
    pub fn end(&mut self, unroll: bool) -> Result<JournalResult> {
        if self.ended {
            warn!(target: "pagestore::ckpt", "Metadata journal ended twice");
            return Ok(JournalResult::default());
        }
        self.ended = true;

        let locks = std::mem::take(&mut self.locks);
        let pending = std::mem::take(&mut self.pending);
        let mut result = JournalResult {
            locks_released: locks.len(),
            ..JournalResult::default()
        };

        if unroll {
            for p in &pending {
                warn!(
                    target: "pagestore::ckpt",
                    uri = %p.uri,
                    count = p.checkpoints.len(),
                    "Reclamation abandoned"
                );
                result.abandoned += p.checkpoints.len();
            }
        } else {
            for (i, p) in pending.iter().enumerate() {
                if let Err(e) = self.block_manager.resolve(&p.uri, &p.checkpoints) {
                    for rest in &pending[i..] {
                        warn!(
                            target: "pagestore::ckpt",
                            uri = %rest.uri,
                            count = rest.checkpoints.len(),
                            "Reclamation abandoned"
                        );
                    }
                    return Err(e.with_target(p.uri.clone()));
                }
                result.reclaimed += p.checkpoints.len();
            }
            result.committed = true;
        }

        drop(locks);
        debug!(
            target: "pagestore::ckpt",
            committed = result.committed,
            reclaimed = result.reclaimed,
            abandoned = result.abandoned,
            "Metadata tracking ended"
        );
        Ok(result)
    }
}

impl fmt::Debug for MetaJournal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaJournal")
            .field("pending", &self.pending())
            .field("locks", &self.locks.len())
            .field("immediate", &self.immediate)
            .field("ended", &self.ended)
            .finish()
    }
}

impl Drop for MetaJournal {
    fn drop(&mut self) {
        if !self.ended {
            let _ = self.end(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::TrackingBlockManager;
    use pagestore_concurrency::CheckpointLocks;
    use pagestore_core::Error;

    fn setup() -> (Arc<TrackingBlockManager>, MetaJournal) {
        let bm = Arc::new(TrackingBlockManager::new());
        let journal = MetaJournal::begin(bm.clone());
        (bm, journal)
    }

    #[test]
    fn test_commit_reclaims_in_order() {
        let (bm, mut journal) = setup();
        journal.track_checkpoint("table:a", vec![Checkpoint::new("a1", 1)]);
        journal.track_checkpoint(
            "table:b",
            vec![Checkpoint::new("b1", 1), Checkpoint::new("b2", 2)],
        );
        assert_eq!(journal.pending(), 3);
        assert!(bm.freed().is_empty());

        let result = journal.end(false).unwrap();
        assert!(result.committed);
        assert_eq!(result.reclaimed, 3);
        let names: Vec<_> = bm.freed().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["a1", "b1", "b2"]);
    }

    #[test]
    fn test_unroll_reclaims_nothing() {
        let (bm, mut journal) = setup();
        journal.track_checkpoint("table:a", vec![Checkpoint::new("a1", 1)]);
        let result = journal.end(true).unwrap();
        assert!(!result.committed);
        assert_eq!(result.abandoned, 1);
        assert!(bm.freed().is_empty());
    }

    #[test]
    fn test_immediate_reclaim_bypasses_unroll() {
        let (bm, mut journal) = setup();
        journal.reclaim_now("table:a", &[Checkpoint::new("a1", 1)]).unwrap();
        journal.end(true).unwrap();
        assert_eq!(bm.freed_names("table:a"), vec!["a1"]);
        assert_eq!(journal.reclaimed_immediately(), 1);
    }

    #[test]
    fn test_locks_released_on_end() {
        let locks = CheckpointLocks::new();
        let (_bm, mut journal) = setup();
        journal.track_lock(locks.try_lock_exclusive("table:a", "daily").unwrap());
        assert!(journal.holds_lock("table:a", "daily"));
        assert!(!journal.holds_lock("table:b", "daily"));

        let result = journal.end(true).unwrap();
        assert_eq!(result.locks_released, 1);
        assert!(!locks.is_locked("table:a", "daily"));
    }

    #[test]
    fn test_drop_without_end_unrolls() {
        let locks = CheckpointLocks::new();
        let bm = Arc::new(TrackingBlockManager::new());
        {
            let mut journal = MetaJournal::begin(bm.clone());
            journal.track_checkpoint("table:a", vec![Checkpoint::new("a1", 1)]);
            journal.track_lock(locks.try_lock_exclusive("table:a", "a1").unwrap());
        }
        assert!(bm.freed().is_empty());
        assert!(locks.is_empty());
    }

    #[test]
    fn test_end_twice_settles_once() {
        let (bm, mut journal) = setup();
        journal.track_checkpoint("table:a", vec![Checkpoint::new("a1", 1)]);
        journal.end(false).unwrap();
        let second = journal.end(false).unwrap();
        assert_eq!(second, JournalResult::default());
        assert_eq!(bm.freed().len(), 1);
    }

    #[test]
    fn test_commit_failure_releases_locks() {
        let locks = CheckpointLocks::new();
        let (bm, mut journal) = setup();
        journal.track_checkpoint("table:a", vec![Checkpoint::new("a1", 1)]);
        journal.track_lock(locks.try_lock_exclusive("table:a", "a1").unwrap());
        bm.fail_next_resolve();
        assert!(journal.end(false).is_err());
        assert!(locks.is_empty());
    }

    #[test]
    fn test_commit_failure_abandons_remaining() {
        let (bm, mut journal) = setup();
        journal.track_checkpoint("table:a", vec![Checkpoint::new("a1", 1)]);
        journal.track_checkpoint("table:b", vec![Checkpoint::new("b1", 1)]);
        bm.fail_next_resolve();

        let err = journal.end(false).unwrap_err();
        assert!(err.to_string().starts_with("table:a: "));
        assert!(matches!(err.root(), Error::Storage(_)));
        assert!(bm.freed().is_empty());
        assert_eq!(journal.pending(), 0);

        // Nothing is retried on a second end
        let again = journal.end(false).unwrap();
        assert!(!again.committed);
        assert!(bm.freed().is_empty());
    }
}

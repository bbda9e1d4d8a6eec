//! Backup session tracking
//!
//! A backup pins every existing checkpoint while it copies files out of the
//! database. Checkpoint operations consult [`BackupTracker::is_active`]
//! before deleting anything.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::info;

/// Counts open backup sessions
#[derive(Debug, Default)]
pub struct BackupTracker {
    open: AtomicUsize,
}

impl BackupTracker {
    /// Create a tracker with no open sessions
    pub fn new() -> Arc<Self> {
        Arc::new(BackupTracker::default())
    }

    /// Open a backup session
    pub fn begin(self: &Arc<Self>) -> BackupSession {
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        info!(target: "pagestore::backup", open, "Backup session opened");
        BackupSession {
            tracker: Arc::clone(self),
        }
    }

    /// True while any backup session is open
    pub fn is_active(&self) -> bool {
        self.open.load(Ordering::SeqCst) > 0
    }

    /// Number of open sessions
    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

/// Open backup session; closes on drop
#[derive(Debug)]
pub struct BackupSession {
    tracker: Arc<BackupTracker>,
}

impl Drop for BackupSession {
    fn drop(&mut self) {
        let open = self.tracker.open.fetch_sub(1, Ordering::SeqCst) - 1;
        info!(target: "pagestore::backup", open, "Backup session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_nest() {
        let tracker = BackupTracker::new();
        assert!(!tracker.is_active());
        let a = tracker.begin();
        let b = tracker.begin();
        assert_eq!(tracker.open_sessions(), 2);
        drop(a);
        assert!(tracker.is_active());
        drop(b);
        assert!(!tracker.is_active());
    }
}

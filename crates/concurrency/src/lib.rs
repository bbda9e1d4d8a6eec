//! Concurrency layer for pagestore checkpointing
//!
//! This crate provides the transactional and locking pieces a checkpoint
//! coordinates with:
//! - TransactionContext: isolation level, running state, snapshot window
//! - TransactionManager: id allocation and snapshot capture
//! - IsolationScope / SnapshotTransaction: RAII restoration of session state
//! - CheckpointLocks: non-blocking per-checkpoint-name locks
//! - BackupTracker: open backup sessions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backup;
pub mod locks;
pub mod manager;
pub mod transaction;

pub use backup::{BackupSession, BackupTracker};
pub use locks::{CheckpointLockGuard, CheckpointLocks, CheckpointPin};
pub use manager::{SnapshotTransaction, TransactionManager};
pub use transaction::{IsolationLevel, IsolationScope, Snapshot, TransactionContext};

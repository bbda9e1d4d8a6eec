//! Sessions
//!
//! A session is one caller's context: its id and its transaction state.
//! Checkpoints run inside the calling session and refuse to start while the
//! session has an application transaction open.

use pagestore_concurrency::{IsolationLevel, TransactionContext};

/// Caller context for database operations
#[derive(Debug)]
pub struct Session {
    id: u64,
    txn: TransactionContext,
}

impl Session {
    /// Create a session whose transactions default to `isolation`
    pub fn new(id: u64, isolation: IsolationLevel) -> Self {
        Session {
            id,
            txn: TransactionContext::new(isolation),
        }
    }

    /// Session id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Transaction state
    pub fn txn(&self) -> &TransactionContext {
        &self.txn
    }

    /// Mutable transaction state
    pub fn txn_mut(&mut self) -> &mut TransactionContext {
        &mut self.txn
    }

    /// True while an application transaction is open
    pub fn in_transaction(&self) -> bool {
        self.txn.is_running()
    }
}

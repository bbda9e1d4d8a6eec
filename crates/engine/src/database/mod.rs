//! Database facade
//!
//! `Database` ties the checkpoint machinery to its collaborators and offers
//! the table lifecycle around it:
//!
//! - create, open, close and drop tables
//! - record writes (marks the table modified)
//! - checkpoint the database under the schema lock
//! - open cursors on named checkpoints, which pin them against deletion
//! - begin backup sessions
//!
//! ```text
//! let db = Database::in_memory()?;
//! db.create_table("table:orders")?;
//! db.write("table:orders")?;
//!
//! let mut session = db.open_session();
//! let summary = db.checkpoint(&mut session, &CheckpointConfig::new().with_name("daily"))?;
//!
//! let cursor = db.open_checkpoint("table:orders", "daily")?;
//! ```

mod builder;
mod cursor;

pub use builder::{DatabaseBuilder, METADATA_FILE_NAME};
pub use cursor::CheckpointCursor;

use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pagestore_concurrency::{
    BackupSession, BackupTracker, CheckpointLocks, IsolationLevel, TransactionContext,
    TransactionManager,
};
use pagestore_core::{CheckpointConfig, CheckpointList, Error, Result};
use pagestore_durability::{MetadataStore, METADATA_URI};
use tracing::{debug, info, warn};

use crate::coordinator::{CheckpointCoordinator, CheckpointSummary};
use crate::registry::TableRegistry;
use crate::session::Session;
use crate::table::TableHandle;
use crate::tree::{CheckpointKind, TreeOutcome};

/// A pagestore database
pub struct Database {
    registry: Arc<TableRegistry>,
    metadata: Arc<dyn MetadataStore>,
    locks: Arc<CheckpointLocks>,
    backups: Arc<BackupTracker>,
    txn_manager: Arc<TransactionManager>,
    coordinator: CheckpointCoordinator,
    /// Serializes checkpoints and table lifecycle changes
    schema_lock: Mutex<()>,
    next_session_id: AtomicU64,
}

impl Database {
    /// Builder for a database with custom collaborators
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    /// Open a database whose metadata lives under `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata file exists but cannot be loaded.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        DatabaseBuilder::new().path(path.as_ref()).open()
    }

    /// Open a database with in-memory metadata
    pub fn in_memory() -> Result<Arc<Self>> {
        DatabaseBuilder::new().open()
    }

    /// Start a session
    pub fn open_session(&self) -> Session {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        Session::new(id, IsolationLevel::ReadCommitted)
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// Create a table and open it
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if the table already exists.
    pub fn create_table(&self, uri: &str) -> Result<Arc<TableHandle>> {
        let _schema = self.schema_lock.lock();
        self.metadata.create(uri)?;
        info!(target: "pagestore::db", table = uri, "Table created");
        Ok(self.registry.open(uri))
    }

    /// Open an existing table
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the table has no metadata entry.
    pub fn open_table(&self, uri: &str) -> Result<Arc<TableHandle>> {
        if self.metadata.get_checkpoint_list(uri)?.is_none() {
            return Err(Error::not_found(uri));
        }
        Ok(self.registry.open(uri))
    }

    /// Close a table, checkpointing it if it has changes
    ///
    /// The checkpoint reads uncommitted changes: a closing handle gets no
    /// later chance to write them.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidInput` for the metadata table
    /// - `Error::NotFound` if the table is not open
    /// - any failure of the closing checkpoint; the handle stays open
    pub fn close_table(&self, uri: &str) -> Result<TreeOutcome> {
        if uri == METADATA_URI {
            return Err(Error::invalid_input("the metadata table cannot be closed"));
        }
        let _schema = self.schema_lock.lock();
        let handle = self
            .registry
            .find(uri)
            .ok_or_else(|| Error::not_found(uri))?;

        let mut txn = TransactionContext::new(IsolationLevel::ReadUncommitted);
        let outcome = self
            .coordinator
            .executor()
            .checkpoint_tree(&handle, CheckpointKind::HandleClosing, None, &mut txn, None)
            .map_err(|e| e.with_target(uri))?;

        self.registry.remove(uri);
        debug!(target: "pagestore::db", table = uri, ?outcome, "Table closed");
        Ok(outcome)
    }

    /// Remove a table's metadata entry
    ///
    /// A handle that is still open becomes dead: later checkpoints discard
    /// its cache without writing.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the table does not exist.
    pub fn drop_table(&self, uri: &str) -> Result<()> {
        if uri == METADATA_URI {
            return Err(Error::invalid_input("the metadata table cannot be dropped"));
        }
        let _schema = self.schema_lock.lock();
        if !self.metadata.remove(uri)? {
            return Err(Error::not_found(uri));
        }
        info!(target: "pagestore::db", table = uri, "Table dropped");
        Ok(())
    }

    /// Record a change to an open table
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the table is not open.
    pub fn write(&self, uri: &str) -> Result<()> {
        let handle = self
            .registry
            .find(uri)
            .ok_or_else(|| Error::not_found(uri))?;
        handle.mark_modified();
        Ok(())
    }

    /// A table's persisted checkpoints
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the table does not exist.
    pub fn checkpoints(&self, uri: &str) -> Result<CheckpointList> {
        self.metadata
            .get_checkpoint_list(uri)?
            .ok_or_else(|| Error::not_found(uri))
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin an application transaction in the session
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if one is already running.
    pub fn begin_transaction(&self, session: &mut Session) -> Result<()> {
        let isolation = session.txn().isolation();
        self.txn_manager.begin(session.txn_mut(), isolation)
    }

    /// End the session's application transaction
    pub fn end_transaction(&self, session: &mut Session) {
        self.txn_manager.release(session.txn_mut());
    }

    // ========================================================================
    // Checkpoints
    // ========================================================================

    /// Checkpoint the database
    ///
    /// Only one checkpoint runs at a time.
    ///
    /// # Errors
    ///
    /// See [`CheckpointCoordinator::checkpoint_database`].
    pub fn checkpoint(
        &self,
        session: &mut Session,
        config: &CheckpointConfig,
    ) -> Result<CheckpointSummary> {
        let _schema = self.schema_lock.lock();
        self.coordinator.checkpoint_database(session, config)
    }

    /// Open a cursor on a table's most recent checkpoint called `name`
    ///
    /// Asking for the internal name opens the latest internal checkpoint.
    /// The checkpoint cannot be dropped while the cursor is open.
    ///
    /// # Errors
    ///
    /// - `Error::NotFound` if the table or checkpoint does not exist
    /// - `Error::Busy` if the checkpoint is being dropped
    pub fn open_checkpoint(self: &Arc<Self>, uri: &str, name: &str) -> Result<CheckpointCursor> {
        let checkpoint = self
            .checkpoints(uri)?
            .latest_named(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{}: no checkpoint named \"{}\"", uri, name)))?;
        let pin = self.locks.pin(uri, &checkpoint.name)?;

        // Dropped between the lookup and the pin
        let still_present = self
            .checkpoints(uri)?
            .iter()
            .any(|c| c.name == checkpoint.name && c.order == checkpoint.order);
        if !still_present {
            return Err(Error::not_found(format!(
                "{}: no checkpoint named \"{}\"",
                uri, name
            )));
        }

        let handle = self.registry.acquire_checkpoint(uri, &checkpoint.name);
        debug!(target: "pagestore::db", table = uri, name = %checkpoint.name, "Checkpoint cursor opened");
        Ok(CheckpointCursor::new(Arc::clone(self), handle, checkpoint, pin))
    }

    /// Begin a backup; checkpoints are pinned until the session drops
    pub fn begin_backup(&self) -> BackupSession {
        self.backups.begin()
    }

    /// True while any backup session is open
    pub fn is_backup_active(&self) -> bool {
        self.backups.is_active()
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Open table handles
    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    /// Per-checkpoint lock table
    pub fn locks(&self) -> &Arc<CheckpointLocks> {
        &self.locks
    }

    /// Transaction manager
    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.txn_manager
    }

    /// Checkpoint coordinator
    pub fn coordinator(&self) -> &CheckpointCoordinator {
        &self.coordinator
    }

    fn close_checkpoint_handle(&self, handle: &TableHandle) {
        let (uri, name) = (handle.uri(), handle.checkpoint_name().unwrap_or_default());
        if self.registry.release_checkpoint(uri, name).is_none() {
            return;
        }
        let mut txn = TransactionContext::new(IsolationLevel::ReadUncommitted);
        if let Err(e) = self.coordinator.executor().checkpoint_tree(
            handle,
            CheckpointKind::HandleClosing,
            None,
            &mut txn,
            None,
        ) {
            warn!(target: "pagestore::db", table = uri, name, error = %e, "Checkpoint handle close failed");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("open_handles", &self.registry.len())
            .field("backup_active", &self.backups.is_active())
            .finish_non_exhaustive()
    }
}

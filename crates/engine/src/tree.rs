//! Single-table checkpoint
//!
//! [`TreeCheckpointer::checkpoint_tree`] writes one checkpoint of one table:
//!
//! 1. Checkpoint handles are never written. An explicit checkpoint of one
//!    is a no-op; closing one discards its cache.
//! 2. Closing a clean handle discards its cache.
//! 3. A table without a metadata entry is dead: discard, nothing to write.
//! 4. Resolve the new name (the internal name when none is given) and apply
//!    the request's `drop` clause.
//! 5. Flag every existing checkpoint in the new checkpoint's slot.
//! 6. Skip the write if the table is clean and the only deletion is the most
//!    recent checkpoint in the same slot.
//! 7. Append the new record; under a journal, lock every checkpoint being
//!    deleted. Busy internal checkpoints are kept, busy named ones fail.
//! 8. Dirty the root, clear `modified`, flush.
//! 9. Persist the list with read-uncommitted isolation and reclaim the
//!    deleted checkpoints, deferred through the journal when there is one.
//!
//! The transaction's isolation level is restored on every exit path.

use std::sync::{Arc, Weak};

use pagestore_concurrency::{BackupTracker, CheckpointLocks, IsolationLevel, TransactionContext};
use pagestore_core::{
    drop_named, drop_range_from, drop_range_to, internal_name, is_reserved, validate_name,
    CheckpointConfig, CheckpointList, DropSpec, Error, Result, RESERVED_CHECKPOINT_NAME,
};
use pagestore_durability::{
    BlockManager, CacheFlush, MetaJournal, MetadataStore, SyncMode, METADATA_URI,
};
use tracing::{debug, info, warn};

use crate::registry::TableRegistry;
use crate::table::TableHandle;

/// Why a table is being checkpointed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointKind {
    /// Application or database-wide checkpoint
    Explicit,
    /// The table's handle is being closed
    HandleClosing,
}

/// Result of checkpointing one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeOutcome {
    /// Explicit checkpoint of a checkpoint handle
    NoOp,
    /// Cache dropped without writing
    Discarded,
    /// Clean table already has this checkpoint
    Skipped,
    /// A new checkpoint was written
    Written {
        /// Name stored in the checkpoint list
        name: String,
        /// Checkpoints removed from the list
        dropped: Vec<String>,
        /// Internal checkpoints kept because they were in use
        kept: Vec<String>,
    },
}

impl TreeOutcome {
    /// True if a checkpoint was written
    pub fn is_written(&self) -> bool {
        matches!(self, TreeOutcome::Written { .. })
    }
}

/// Check the names in a checkpoint request
///
/// # Errors
///
/// Returns `Error::InvalidInput` if the checkpoint name or any `drop` name
/// uses the reserved prefix.
pub fn validate_request(config: &CheckpointConfig) -> Result<()> {
    if let Some(name) = config.checkpoint_name() {
        validate_name(name)?;
    }
    for spec in &config.drop {
        validate_name(spec.name())?;
    }
    Ok(())
}

fn same_slot(a: &str, b: &str) -> bool {
    (is_reserved(a) && is_reserved(b)) || a == b
}

/// Checkpoints individual tables
#[derive(Clone)]
pub struct TreeCheckpointer {
    cache: Arc<dyn CacheFlush>,
    metadata: Arc<dyn MetadataStore>,
    block_manager: Arc<dyn BlockManager>,
    locks: Arc<CheckpointLocks>,
    backups: Arc<BackupTracker>,
    registry: Weak<TableRegistry>,
}

impl TreeCheckpointer {
    /// Create an executor over the given collaborators
    ///
    /// The registry is only used to find the metadata table's handle.
    pub fn new(
        cache: Arc<dyn CacheFlush>,
        metadata: Arc<dyn MetadataStore>,
        block_manager: Arc<dyn BlockManager>,
        locks: Arc<CheckpointLocks>,
        backups: Arc<BackupTracker>,
        registry: &Arc<TableRegistry>,
    ) -> Self {
        TreeCheckpointer {
            cache,
            metadata,
            block_manager,
            locks,
            backups,
            registry: Arc::downgrade(registry),
        }
    }

    /// Checkpoint one table
    ///
    /// `journal` is present while a database-wide checkpoint tracks metadata
    /// changes; deletions are then locked and their reclamation deferred.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidInput` for reserved names or malformed `drop` entries
    /// - `Error::Busy` if a named checkpoint being deleted is in use
    /// - any cache or metadata failure
    pub fn checkpoint_tree(
        &self,
        table: &TableHandle,
        kind: CheckpointKind,
        config: Option<&CheckpointConfig>,
        txn: &mut TransactionContext,
        mut journal: Option<&mut MetaJournal>,
    ) -> Result<TreeOutcome> {
        let uri = table.uri();

        if table.is_checkpoint_handle() {
            return match kind {
                CheckpointKind::Explicit => Ok(TreeOutcome::NoOp),
                CheckpointKind::HandleClosing => self.discard(table, txn),
            };
        }

        if !table.is_modified() && kind == CheckpointKind::HandleClosing {
            return self.discard(table, txn);
        }

        let mut list = match self.metadata.get_checkpoint_list(uri)? {
            Some(list) => list,
            None => {
                debug!(target: "pagestore::ckpt", table = uri, "Table has no metadata, discarding");
                return self.discard(table, txn);
            }
        };

        let slot = match config.and_then(|c| c.checkpoint_name()) {
            Some(name) => {
                validate_name(name)?;
                name.to_string()
            }
            None => RESERVED_CHECKPOINT_NAME.to_string(),
        };

        if let Some(config) = config {
            for spec in &config.drop {
                validate_name(spec.name())?;
                match spec {
                    DropSpec::Named(name) => drop_named(&mut list, name),
                    DropSpec::From { from } => drop_range_from(&mut list, from),
                    DropSpec::To { to } => drop_range_to(&mut list, to),
                }
            }
        }

        drop_named(&mut list, &slot);

        if !table.is_modified()
            && kind == CheckpointKind::Explicit
            && self.only_replaces_last(&list, &slot)
        {
            debug!(target: "pagestore::ckpt", table = uri, name = %slot, "Clean table, checkpoint skipped");
            return Ok(TreeOutcome::Skipped);
        }

        let name = if is_reserved(&slot) {
            internal_name(list.next_generation())
        } else {
            slot
        };
        list.push_new(name.clone());

        let mut txn = txn.preserve_isolation();

        let kept = match journal.as_deref_mut() {
            Some(journal) => self.lock_deletions(uri, &mut list, journal)?,
            None => Vec::new(),
        };

        self.cache.force_write(table.cache_id())?;
        table.clear_modified();

        let mode = match kind {
            CheckpointKind::Explicit => SyncMode::Sync,
            CheckpointKind::HandleClosing => {
                txn.set_isolation(IsolationLevel::ReadUncommitted);
                SyncMode::SyncDiscard
            }
        };
        // Until the list is persisted the changes belong to no checkpoint
        let persisted = self
            .cache
            .flush(table.cache_id(), Some(&mut list), mode, &txn)
            .and_then(|()| {
                let removed = list.resolve();
                txn.set_isolation(IsolationLevel::ReadUncommitted);
                self.metadata.set_checkpoint_list(uri, &list, &txn)?;
                Ok(removed)
            });
        let removed = match persisted {
            Ok(removed) => removed,
            Err(e) => {
                table.mark_modified();
                return Err(e);
            }
        };
        self.touch_metadata_table(uri);

        match (journal, kind) {
            (Some(journal), CheckpointKind::Explicit) => {
                journal.track_checkpoint(uri, removed.clone());
            }
            (Some(journal), CheckpointKind::HandleClosing) => journal.reclaim_now(uri, &removed)?,
            (None, _) => self.block_manager.resolve(uri, &removed)?,
        }

        let dropped: Vec<String> = removed.into_iter().map(|c| c.name).collect();
        info!(
            target: "pagestore::ckpt",
            table = uri,
            name = %name,
            dropped = dropped.len(),
            kept = kept.len(),
            "Checkpoint written"
        );
        Ok(TreeOutcome::Written { name, dropped, kept })
    }

    fn discard(&self, table: &TableHandle, txn: &TransactionContext) -> Result<TreeOutcome> {
        self.cache
            .flush(table.cache_id(), None, SyncMode::DiscardNoWrite, txn)?;
        Ok(TreeOutcome::Discarded)
    }

    /// True if the only checkpoint being deleted is the last one, in `slot`
    fn only_replaces_last(&self, list: &CheckpointList, slot: &str) -> bool {
        let plan = list.deletion_plan();
        plan.len() == 1
            && plan[0] + 1 == list.len()
            && list.last().map_or(false, |last| same_slot(&last.name, slot))
    }

    /// Lock every checkpoint flagged for deletion
    ///
    /// Internal checkpoints that cannot be dropped right now are unflagged
    /// and returned; they will be dropped by a later checkpoint.
    fn lock_deletions(
        &self,
        uri: &str,
        list: &mut CheckpointList,
        journal: &mut MetaJournal,
    ) -> Result<Vec<String>> {
        let backup = self.backups.is_active();
        let mut kept = Vec::new();

        for idx in list.deletion_plan() {
            let name = list.entries()[idx].name.clone();
            let reserved = is_reserved(&name);

            if backup {
                if reserved {
                    list.entries_mut()[idx].flags.delete = false;
                    kept.push(name);
                    continue;
                }
                return Err(Error::busy(
                    "checkpoints cannot be dropped when backup cursors are open",
                ));
            }

            if journal.holds_lock(uri, &name) {
                continue;
            }
            match self.locks.try_lock_exclusive(uri, &name) {
                Ok(guard) => journal.track_lock(guard),
                Err(e) if e.is_busy() && reserved => {
                    list.entries_mut()[idx].flags.delete = false;
                    kept.push(name);
                }
                Err(e) if e.is_busy() => {
                    return Err(Error::busy(format!(
                        "checkpoint \"{}\" cannot be dropped when in use",
                        name
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        if !kept.is_empty() {
            warn!(target: "pagestore::ckpt", table = uri, kept = ?kept, "Internal checkpoints in use, not dropped");
        }
        Ok(kept)
    }

    fn touch_metadata_table(&self, uri: &str) {
        if uri == METADATA_URI {
            return;
        }
        if let Some(meta) = self
            .registry
            .upgrade()
            .and_then(|registry| registry.find(METADATA_URI))
        {
            meta.mark_modified();
        }
    }
}

impl std::fmt::Debug for TreeCheckpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeCheckpointer").finish_non_exhaustive()
    }
}

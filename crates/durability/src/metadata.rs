//! Metadata store contract
//!
//! The metadata table maps every table identifier to its persisted
//! checkpoint list. A table missing from metadata is logically dead: its
//! handle may still be open, but there is nothing to checkpoint.
//!
//! The metadata table itself has an entry under [`METADATA_URI`], created
//! when the store is.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;

use pagestore_concurrency::{IsolationLevel, TransactionContext};
use pagestore_core::{CheckpointList, Error, Result};
use tracing::debug;

/// Identifier of the engine's own metadata table
pub const METADATA_URI: &str = "metadata:";

/// Persisted checkpoint lists, one per table
pub trait MetadataStore: Send + Sync {
    /// Load a table's checkpoint list; `None` if the table has no entry
    fn get_checkpoint_list(&self, uri: &str) -> Result<Option<CheckpointList>>;

    /// Replace a table's checkpoint list
    ///
    /// Transient flags are not persisted.
    fn set_checkpoint_list(
        &self,
        uri: &str,
        checkpoints: &CheckpointList,
        txn: &TransactionContext,
    ) -> Result<()>;

    /// Create an entry with an empty checkpoint list
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if the table already exists.
    fn create(&self, uri: &str) -> Result<()>;

    /// Remove a table's entry; returns false if there was none
    fn remove(&self, uri: &str) -> Result<bool>;

    /// Every table with an entry, in identifier order
    fn tables(&self) -> Result<Vec<String>>;
}

/// One `set_checkpoint_list` call as observed by [`InMemoryMetadata`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataWrite {
    /// Table whose list was written
    pub uri: String,
    /// Isolation of the writing transaction
    pub isolation: IsolationLevel,
}

/// Metadata store kept in memory
#[derive(Debug)]
pub struct InMemoryMetadata {
    entries: RwLock<BTreeMap<String, CheckpointList>>,
    writes: Mutex<Vec<MetadataWrite>>,
    fail_next: Mutex<Option<String>>,
}

impl InMemoryMetadata {
    /// Create a store holding only the metadata table's own entry
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(METADATA_URI.to_string(), CheckpointList::new());
        InMemoryMetadata {
            entries: RwLock::new(entries),
            writes: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
        }
    }

    /// Every list write so far, oldest first
    pub fn writes(&self) -> Vec<MetadataWrite> {
        self.writes.lock().clone()
    }

    /// Make the next write of `uri` fail
    pub fn fail_next_write(&self, uri: &str) {
        *self.fail_next.lock() = Some(uri.to_string());
    }
}

impl Default for InMemoryMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataStore for InMemoryMetadata {
    fn get_checkpoint_list(&self, uri: &str) -> Result<Option<CheckpointList>> {
        Ok(self.entries.read().get(uri).cloned())
    }

    fn set_checkpoint_list(
        &self,
        uri: &str,
        checkpoints: &CheckpointList,
        txn: &TransactionContext,
    ) -> Result<()> {
        {
            let mut fail = self.fail_next.lock();
            if fail.as_deref() == Some(uri) {
                *fail = None;
                return Err(Error::storage(format!("{}: metadata update failed", uri)));
            }
        }

        let mut persisted = checkpoints.clone();
        persisted.clear_flags();
        self.entries.write().insert(uri.to_string(), persisted);
        self.writes.lock().push(MetadataWrite {
            uri: uri.to_string(),
            isolation: txn.isolation(),
        });
        debug!(target: "pagestore::meta", uri, count = checkpoints.len(), "Checkpoint list updated");
        Ok(())
    }

    fn create(&self, uri: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(uri) {
            return Err(Error::invalid_input(format!("{}: table already exists", uri)));
        }
        entries.insert(uri.to_string(), CheckpointList::new());
        Ok(())
    }

    fn remove(&self, uri: &str) -> Result<bool> {
        Ok(self.entries.write().remove(uri).is_some())
    }

    fn tables(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

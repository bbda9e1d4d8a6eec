//! Registry of open table handles
//!
//! Handles are keyed by table identifier and, for checkpoint handles, by the
//! checkpoint name. Checkpoint handles are shared by every cursor on the same
//! checkpoint and leave the registry when the last cursor closes.
//!
//! Iteration works on a snapshot of the registered handles, so callbacks may
//! look up other handles (the checkpoint executor does, to flag the metadata
//! table) without deadlocking.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use pagestore_core::Result;

use crate::table::TableHandle;

type HandleKey = (String, Option<String>);

#[derive(Debug)]
struct Registered {
    handle: Arc<TableHandle>,
    users: usize,
}

/// Open table handles
#[derive(Debug, Default)]
pub struct TableRegistry {
    handles: RwLock<BTreeMap<HandleKey, Registered>>,
}

impl TableRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        TableRegistry::default()
    }

    /// Live handle of a table, opening one if needed
    pub fn open(&self, uri: &str) -> Arc<TableHandle> {
        let mut handles = self.handles.write();
        let entry = handles
            .entry((uri.to_string(), None))
            .or_insert_with(|| Registered {
                handle: Arc::new(TableHandle::new(uri)),
                users: 0,
            });
        entry.users += 1;
        Arc::clone(&entry.handle)
    }

    /// Live handle of a table, if open
    pub fn find(&self, uri: &str) -> Option<Arc<TableHandle>> {
        self.handles
            .read()
            .get(&(uri.to_string(), None))
            .map(|r| Arc::clone(&r.handle))
    }

    /// Handle on a table's checkpoint, if open
    pub fn find_checkpoint(&self, uri: &str, name: &str) -> Option<Arc<TableHandle>> {
        self.handles
            .read()
            .get(&(uri.to_string(), Some(name.to_string())))
            .map(|r| Arc::clone(&r.handle))
    }

    /// True if the table has a live handle
    pub fn is_open(&self, uri: &str) -> bool {
        self.handles.read().contains_key(&(uri.to_string(), None))
    }

    /// Remove a table's live handle
    pub fn remove(&self, uri: &str) -> Option<Arc<TableHandle>> {
        self.handles
            .write()
            .remove(&(uri.to_string(), None))
            .map(|r| r.handle)
    }

    /// Register a user of a checkpoint handle, opening it if needed
    pub fn acquire_checkpoint(&self, uri: &str, name: &str) -> Arc<TableHandle> {
        let mut handles = self.handles.write();
        let entry = handles
            .entry((uri.to_string(), Some(name.to_string())))
            .or_insert_with(|| Registered {
                handle: Arc::new(TableHandle::checkpoint_handle(uri, name)),
                users: 0,
            });
        entry.users += 1;
        Arc::clone(&entry.handle)
    }

    /// Drop a user of a checkpoint handle
    ///
    /// Returns the handle once its last user is gone; it is no longer
    /// registered at that point.
    pub fn release_checkpoint(&self, uri: &str, name: &str) -> Option<Arc<TableHandle>> {
        let key = (uri.to_string(), Some(name.to_string()));
        let mut handles = self.handles.write();
        let entry = handles.get_mut(&key)?;
        entry.users = entry.users.saturating_sub(1);
        if entry.users > 0 {
            return None;
        }
        handles.remove(&key).map(|r| r.handle)
    }

    /// Call `f` on every open handle, live and checkpoint, in key order
    ///
    /// Stops at the first error.
    pub fn for_each_open<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&Arc<TableHandle>) -> Result<()>,
    {
        let snapshot: Vec<Arc<TableHandle>> = self
            .handles
            .read()
            .values()
            .map(|r| Arc::clone(&r.handle))
            .collect();
        for handle in &snapshot {
            f(handle)?;
        }
        Ok(())
    }

    /// Identifiers of tables with a live handle
    pub fn open_uris(&self) -> Vec<String> {
        self.handles
            .read()
            .keys()
            .filter(|(_, ckpt)| ckpt.is_none())
            .map(|(uri, _)| uri.clone())
            .collect()
    }

    /// Number of registered handles
    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    /// True if nothing is open
    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }
}

//! Open table handles
//!
//! A handle is either the live handle of a table, which accumulates writes,
//! or a read-only handle on one of the table's named checkpoints.
//!
//! `modified` is the single source of truth for "this table has changes no
//! checkpoint has captured yet". The write path sets it after every change;
//! a checkpoint clears it immediately before flushing. Any write that lands
//! after the clear sets it again, so no change is lost to a later
//! checkpoint.

use std::sync::atomic::{fence, AtomicBool, Ordering};

/// An open table
#[derive(Debug)]
pub struct TableHandle {
    uri: String,
    checkpoint: Option<String>,
    cache_id: String,
    modified: AtomicBool,
}

impl TableHandle {
    /// Live handle on a table
    pub fn new(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        TableHandle {
            cache_id: uri.clone(),
            uri,
            checkpoint: None,
            modified: AtomicBool::new(false),
        }
    }

    /// Read-only handle on a named checkpoint of a table
    pub fn checkpoint_handle(uri: impl Into<String>, name: impl Into<String>) -> Self {
        let uri = uri.into();
        let name = name.into();
        TableHandle {
            cache_id: format!("{}#{}", uri, name),
            uri,
            checkpoint: Some(name),
            modified: AtomicBool::new(false),
        }
    }

    /// Table identifier
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Key of this handle's pages in the page cache
    ///
    /// Checkpoint handles cache their pages apart from the live table.
    pub fn cache_id(&self) -> &str {
        &self.cache_id
    }

    /// Checkpoint this handle reads, for checkpoint handles
    pub fn checkpoint_name(&self) -> Option<&str> {
        self.checkpoint.as_deref()
    }

    /// True for read-only checkpoint handles
    pub fn is_checkpoint_handle(&self) -> bool {
        self.checkpoint.is_some()
    }

    /// True if the table has uncheckpointed changes
    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::SeqCst)
    }

    /// Record that the table changed
    pub fn mark_modified(&self) {
        self.modified.store(true, Ordering::SeqCst);
    }

    /// Clear the modified flag ahead of a flush
    ///
    /// Every change made before this call is captured by the flush that
    /// follows it.
    pub fn clear_modified(&self) {
        self.modified.store(false, Ordering::SeqCst);
        fence(Ordering::SeqCst);
    }
}

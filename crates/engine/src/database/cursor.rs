//! Cursors on named checkpoints

use std::sync::Arc;

use pagestore_concurrency::CheckpointPin;
use pagestore_core::Checkpoint;

use super::Database;
use crate::table::TableHandle;

/// Read-only cursor on one checkpoint of a table
///
/// While the cursor is open the checkpoint is pinned: a checkpoint that
/// tries to drop it fails with `Busy` (internal checkpoints are kept
/// instead). Dropping the last cursor on a checkpoint closes its handle.
pub struct CheckpointCursor {
    db: Arc<Database>,
    handle: Arc<TableHandle>,
    checkpoint: Checkpoint,
    _pin: CheckpointPin,
}

impl CheckpointCursor {
    pub(super) fn new(
        db: Arc<Database>,
        handle: Arc<TableHandle>,
        checkpoint: Checkpoint,
        pin: CheckpointPin,
    ) -> Self {
        CheckpointCursor {
            db,
            handle,
            checkpoint,
            _pin: pin,
        }
    }

    /// Table identifier
    pub fn uri(&self) -> &str {
        self.handle.uri()
    }

    /// Name of the checkpoint being read
    pub fn name(&self) -> &str {
        &self.checkpoint.name
    }

    /// The checkpoint record as of opening
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Handle on the checkpoint
    pub fn handle(&self) -> &Arc<TableHandle> {
        &self.handle
    }
}

impl std::fmt::Debug for CheckpointCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointCursor")
            .field("uri", &self.uri())
            .field("name", &self.name())
            .finish()
    }
}

impl Drop for CheckpointCursor {
    fn drop(&mut self) {
        self.db.close_checkpoint_handle(&self.handle);
    }
}

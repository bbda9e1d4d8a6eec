//! Checkpoint engine for pagestore
//!
//! This crate orchestrates the lower layers:
//! - TableHandle / TableRegistry: open tables and checkpoint handles
//! - TreeCheckpointer: checkpoint one table (edit, lock, flush, persist, reclaim)
//! - CheckpointCoordinator: checkpoint every target table of a request
//! - Database: table lifecycle, sessions, checkpoint cursors and backups
//!
//! The engine is the only component that knows about:
//! - which tables a request reaches
//! - the order of flush, metadata update and block reclamation
//! - when reclamation is deferred to the end of a request

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod database;
pub mod registry;
pub mod session;
pub mod table;
pub mod tree;

pub use coordinator::{
    CheckpointCoordinator, CheckpointSummary, CheckpointTargets, TableCheckpoint,
};
pub use database::{CheckpointCursor, Database, DatabaseBuilder, METADATA_FILE_NAME};
pub use pagestore_durability::METADATA_URI;
pub use registry::TableRegistry;
pub use session::Session;
pub use table::TableHandle;
pub use tree::{validate_request, CheckpointKind, TreeCheckpointer, TreeOutcome};

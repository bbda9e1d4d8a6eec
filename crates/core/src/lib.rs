//! Core types for pagestore checkpointing
//!
//! This crate defines the foundational types used throughout the system:
//! - Error: Error taxonomy shared by every layer
//! - Checkpoint / CheckpointList: per-table checkpoint history
//! - editor: deletion selection over a checkpoint list (named, from, to)
//! - name: reserved internal checkpoint name rules
//! - config: checkpoint request configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod config;
pub mod editor;
pub mod error;
pub mod name;

pub use checkpoint::{BlockAddress, Checkpoint, CheckpointFlags, CheckpointList, DeletionPlan};
pub use config::{CheckpointConfig, DropSpec, TargetEntry};
pub use editor::{drop_named, drop_range_from, drop_range_to};
pub use error::{Error, Result};
pub use name::{
    internal_name, is_reserved, validate_name, DROP_ALL, RESERVED_CHECKPOINT_NAME,
};

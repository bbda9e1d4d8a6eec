//! Checkpoint records and per-table checkpoint lists
//!
//! A table's checkpoint list is its chronological history of named
//! checkpoints: position is creation order and the last record is the most
//! recent checkpoint. Names are slots, not identities: the same name may
//! appear more than once and several operations rely on first-match or
//! last-match semantics.
//!
//! The `add`/`delete` flags are transient. They are set while a single
//! checkpoint operation plans its work and are never persisted;
//! [`CheckpointList::resolve`] applies the plan by physically removing the
//! records flagged for deletion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::name::{internal_generation, is_reserved};

/// Location of a checkpoint's root in the table's backing file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockAddress {
    /// Byte offset of the checkpoint's extent
    pub offset: u64,
    /// Length of the extent in bytes
    pub size: u64,
}

/// Transient per-operation flags on a checkpoint record
///
/// The flags are not exclusive: a record added by this operation can in
/// principle also be flagged for deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointFlags {
    /// Record is being created by the current operation
    pub add: bool,
    /// Record is scheduled for removal by the current operation
    pub delete: bool,
}

/// A single checkpoint of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint name (not unique within a list)
    pub name: String,
    /// Creation sequence within the owning table
    pub order: u64,
    /// Wall-clock creation time
    pub created_at: DateTime<Utc>,
    /// Root location, assigned when the checkpoint is written
    pub address: Option<BlockAddress>,
    /// Bytes written for this checkpoint
    pub size: u64,
    /// Transient operation flags
    #[serde(skip)]
    pub flags: CheckpointFlags,
}

impl Checkpoint {
    /// Create an unwritten record
    pub fn new(name: impl Into<String>, order: u64) -> Self {
        Checkpoint {
            name: name.into(),
            order,
            created_at: Utc::now(),
            address: None,
            size: 0,
            flags: CheckpointFlags::default(),
        }
    }

    /// True if this is an internal (unnamed) checkpoint
    pub fn is_internal(&self) -> bool {
        is_reserved(&self.name)
    }

    /// True if scheduled for deletion
    pub fn is_deleted(&self) -> bool {
        self.flags.delete
    }
}

/// Indices of records flagged for deletion, in list order
pub type DeletionPlan = SmallVec<[usize; 8]>;

/// Ordered checkpoint history for one table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointList {
    entries: Vec<Checkpoint>,
}

impl CheckpointList {
    /// Create an empty list
    pub fn new() -> Self {
        CheckpointList::default()
    }

    /// Build a list from records already in chronological order
    pub fn from_entries(entries: Vec<Checkpoint>) -> Self {
        CheckpointList { entries }
    }

    /// Build a list of unwritten records with the given names, oldest first
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Checkpoint::new(name, i as u64 + 1))
            .collect();
        CheckpointList { entries }
    }

    /// All records, oldest first
    pub fn entries(&self) -> &[Checkpoint] {
        &self.entries
    }

    /// Mutable access to all records
    pub fn entries_mut(&mut self) -> &mut [Checkpoint] {
        &mut self.entries
    }

    /// Iterate records, oldest first
    pub fn iter(&self) -> std::slice::Iter<'_, Checkpoint> {
        self.entries.iter()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the table has no checkpoints
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record names, oldest first
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|c| c.name.as_str()).collect()
    }

    /// The most recent record
    pub fn last(&self) -> Option<&Checkpoint> {
        self.entries.last()
    }

    /// Most recent record with the given name
    ///
    /// Asking for the internal name returns the most recent internal
    /// checkpoint of any generation.
    pub fn latest_named(&self, name: &str) -> Option<&Checkpoint> {
        self.entries
            .iter()
            .rev()
            .find(|c| c.name == name || (is_reserved(name) && c.is_internal()))
    }

    /// Next internal-checkpoint generation for this table
    pub fn next_generation(&self) -> u64 {
        self.entries
            .iter()
            .filter_map(|c| internal_generation(&c.name))
            .max()
            .map_or(1, |g| g + 1)
    }

    /// Append a new record flagged `add` and return it
    pub fn push_new(&mut self, name: impl Into<String>) -> &mut Checkpoint {
        let order = self.entries.iter().map(|c| c.order).max().unwrap_or(0) + 1;
        let mut ckpt = Checkpoint::new(name, order);
        ckpt.flags.add = true;
        self.entries.push(ckpt);
        let last = self.entries.len() - 1;
        &mut self.entries[last]
    }

    /// The record being added by the current operation
    pub fn added(&self) -> Option<&Checkpoint> {
        self.entries.iter().find(|c| c.flags.add)
    }

    /// Mutable access to the record being added by the current operation
    pub fn added_mut(&mut self) -> Option<&mut Checkpoint> {
        self.entries.iter_mut().find(|c| c.flags.add)
    }

    /// Indices of records flagged for deletion
    pub fn deletion_plan(&self) -> DeletionPlan {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, c)| c.flags.delete)
            .map(|(i, _)| i)
            .collect()
    }

    /// Number of records flagged for deletion
    pub fn delete_count(&self) -> usize {
        self.entries.iter().filter(|c| c.flags.delete).count()
    }

    /// Clear every transient flag
    pub fn clear_flags(&mut self) {
        for ckpt in &mut self.entries {
            ckpt.flags = CheckpointFlags::default();
        }
    }

    /// Apply the deletion plan
    ///
    /// Removes every record flagged for deletion and clears the `add` flag on
    /// the survivors. Returns the removed records so their blocks can be
    /// reclaimed.
    pub fn resolve(&mut self) -> Vec<Checkpoint> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|c| c.flags.delete);
        self.entries = kept;
        for ckpt in &mut self.entries {
            ckpt.flags.add = false;
        }
        removed
    }
}

impl<'a> IntoIterator for &'a CheckpointList {
    type Item = &'a Checkpoint;
    type IntoIter = std::slice::Iter<'a, Checkpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

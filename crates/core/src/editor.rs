//! Checkpoint list editing
//!
//! Pure, in-memory selection of checkpoints for deletion. Every function here
//! only sets `delete` flags; nothing is removed until the owning operation
//! calls [`CheckpointList::resolve`].
//!
//! The range operations are deliberately asymmetric:
//! - `from` starts at the *first* match, so the whole later history of a
//!   reused name can be dropped from its earliest point;
//! - `to` ends at the *last* match, so the widest prefix of history up to the
//!   most recent use of a name can be dropped.

use crate::checkpoint::CheckpointList;
use crate::name::{selects_reserved, DROP_ALL};

/// Flag every checkpoint with the given name
///
/// Dropping the internal name (or a generation or leading portion of it)
/// flags every internal checkpoint regardless of generation.
pub fn drop_named(list: &mut CheckpointList, name: &str) {
    let reserved = selects_reserved(name);
    for ckpt in list.entries_mut() {
        if ckpt.name == name || (reserved && ckpt.is_internal()) {
            ckpt.flags.delete = true;
        }
    }
}

/// Flag the first checkpoint with the given name and everything after it
///
/// `"all"` flags every checkpoint. No match is a no-op.
pub fn drop_range_from(list: &mut CheckpointList, name: &str) {
    if name == DROP_ALL {
        for ckpt in list.entries_mut() {
            ckpt.flags.delete = true;
        }
        return;
    }

    let mut matched = false;
    for ckpt in list.entries_mut() {
        if !matched && ckpt.name != name {
            continue;
        }
        matched = true;
        ckpt.flags.delete = true;
    }
}

/// Flag everything up to and including the last checkpoint with the given name
///
/// No match is a no-op.
pub fn drop_range_to(list: &mut CheckpointList, name: &str) {
    let mark = match list.iter().rposition(|c| c.name == name) {
        Some(mark) => mark,
        None => return,
    };
    for ckpt in &mut list.entries_mut()[..=mark] {
        ckpt.flags.delete = true;
    }
}

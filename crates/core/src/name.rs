//! Reserved checkpoint names
//!
//! Checkpoints taken without an explicit name are stored under the engine's
//! internal name, suffixed with a per-table generation:
//!
//! - `PagestoreCheckpoint.1`
//! - `PagestoreCheckpoint.2`
//!
//! Applications may not use the internal name or anything starting with it.
//! Rejecting every prefix match keeps the deletion logic simple: if the
//! leading bytes match, the checkpoint is an internal one.

use crate::error::{Error, Result};

/// Internal checkpoint name used when the application supplies none
pub const RESERVED_CHECKPOINT_NAME: &str = "PagestoreCheckpoint";

/// Name that selects every checkpoint in a `drop=(from=...)` clause
pub const DROP_ALL: &str = "all";

/// True if `name` is the internal name or one of its generations
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_CHECKPOINT_NAME)
}

/// True if `name` selects internal checkpoints in a drop request
///
/// A drop of the internal name matches every generation, and so does any
/// non-empty leading portion of it.
pub fn selects_reserved(name: &str) -> bool {
    is_reserved(name) || (!name.is_empty() && RESERVED_CHECKPOINT_NAME.starts_with(name))
}

/// Complain if an application-supplied name uses the reserved prefix
///
/// # Errors
///
/// Returns `Error::InvalidInput` if `name` equals or starts with
/// [`RESERVED_CHECKPOINT_NAME`].
pub fn validate_name(name: &str) -> Result<()> {
    if is_reserved(name) {
        return Err(Error::invalid_input(format!(
            "the checkpoint name \"{}\" is reserved",
            RESERVED_CHECKPOINT_NAME
        )));
    }
    Ok(())
}

/// Generated internal name for a generation
pub fn internal_name(generation: u64) -> String {
    format!("{}.{}", RESERVED_CHECKPOINT_NAME, generation)
}

/// Generation number of an internal name, if it carries one
pub fn internal_generation(name: &str) -> Option<u64> {
    name.strip_prefix(RESERVED_CHECKPOINT_NAME)?
        .strip_prefix('.')?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_reserved() {
        assert!(validate_name(RESERVED_CHECKPOINT_NAME).is_err());
        assert!(validate_name("PagestoreCheckpoint.7").is_err());
        assert!(validate_name("PagestoreCheckpointXYZ").is_err());
    }

    #[test]
    fn test_validate_accepts_other_names() {
        assert!(validate_name("daily").is_ok());
        assert!(validate_name("Pagestore").is_ok());
        assert!(validate_name("checkpoint").is_ok());
    }

    #[test]
    fn test_validate_error_kind() {
        let err = validate_name(RESERVED_CHECKPOINT_NAME).unwrap_err();
        assert!(err.is_invalid_input());
        assert!(err.to_string().contains("is reserved"));
    }

    #[test]
    fn test_selects_reserved() {
        assert!(selects_reserved(RESERVED_CHECKPOINT_NAME));
        assert!(selects_reserved("PagestoreCheckpoint.3"));
        assert!(selects_reserved("Pagestore"));
        assert!(!selects_reserved(""));
        assert!(!selects_reserved("daily"));
    }

    #[test]
    fn test_internal_generation() {
        assert_eq!(internal_name(4), "PagestoreCheckpoint.4");
        assert_eq!(internal_generation("PagestoreCheckpoint.4"), Some(4));
        assert_eq!(internal_generation(RESERVED_CHECKPOINT_NAME), None);
        assert_eq!(internal_generation("daily"), None);
    }
}

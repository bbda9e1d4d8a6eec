//! Error types for pagestore checkpointing
//!
//! This module defines the error taxonomy shared by every layer of the
//! checkpoint path. We use `thiserror` for automatic `Display` and `Error`
//! trait implementations.
//!
//! | Variant | Meaning |
//! |---------|---------|
//! | `InvalidInput` | bad configuration, reserved name, checkpoint inside a transaction |
//! | `Busy` | a checkpoint slated for deletion is pinned by a cursor or backup |
//! | `NotFound` | an object has no metadata entry |
//! | `Io` / `Storage` / `Serialization` | collaborator failures |
//! | `Target` | any of the above, tagged with the table that produced it |

use std::io;
use thiserror::Error;

/// Result type alias for pagestore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for pagestore
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration or API misuse
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource is in use and the operation does not wait
    #[error("Resource busy: {0}")]
    Busy(String),

    /// Object has no metadata entry
    #[error("Not found: {0}")]
    NotFound(String),

    /// Collaborator (cache, block manager, metadata store) failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal invariant violated
    #[error("Internal error: {0}")]
    Internal(String),

    /// Failure while processing a specific table
    #[error("{target}: {source}")]
    Target {
        /// Table identifier that failed
        target: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a busy error
    pub fn busy(msg: impl Into<String>) -> Self {
        Error::Busy(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Attach the identifier of the table being processed
    ///
    /// Already-tagged errors are returned unchanged so the innermost table wins.
    pub fn with_target(self, target: impl Into<String>) -> Self {
        match self {
            Error::Target { .. } => self,
            other => Error::Target {
                target: target.into(),
                source: Box::new(other),
            },
        }
    }

    /// Strip any `Target` wrapping
    pub fn root(&self) -> &Error {
        match self {
            Error::Target { source, .. } => source.root(),
            other => other,
        }
    }

    /// True if this is (or wraps) a busy error
    pub fn is_busy(&self) -> bool {
        matches!(self.root(), Error::Busy(_))
    }

    /// True if this is (or wraps) a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::NotFound(_))
    }

    /// True if this is (or wraps) an invalid input error
    pub fn is_invalid_input(&self) -> bool {
        matches!(self.root(), Error::InvalidInput(_))
    }
}
